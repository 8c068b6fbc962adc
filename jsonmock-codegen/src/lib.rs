use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use quote::quote_spanned;
use std::path::Path;

/// Turns a function into a `#[test]` that replays a data file against a live
/// target and fails when any task fails.
///
/// ```ignore
/// #[jsonmock_replay_test("data/queries.json", configure)]
/// fn replay_queries(report: &ReplayReport) {
///     assert_eq!(report.attempted(), 3);
/// }
/// ```
///
/// The function body runs after a successful replay; it may take the report
/// as its single argument.
#[proc_macro_attribute]
pub fn jsonmock_replay_test(attrs: TokenStream, item: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(item as syn::ItemFn);
    let args = syn::parse_macro_input!(attrs as syn::AttributeArgs);

    let attributes = &input.attrs;
    let name = &input.sig.ident;
    let inputs = &input.sig.inputs;
    let block = &input.block;

    let data_file: String;

    if args.len() < 2 {
        return quote! {
            compile_error!("A data file and a configuration function should be passed to the macro");
        }
        .into();
    }

    if let syn::NestedMeta::Lit(syn::Lit::Str(parsed_data_file)) = &args[0] {
        data_file = parsed_data_file.value();
        if let Err(stream) = validate_data_path(&data_file, parsed_data_file.span()) {
            return stream.into();
        }
    } else {
        return quote! {
            compile_error!("The first argument should be a string literal!");
        }
        .into();
    }

    let configuration_function;
    if let syn::NestedMeta::Meta(syn::Meta::Path(function_path)) = &args[1] {
        configuration_function = function_path;
    } else {
        let error = quote! {
            compile_error!("The second argument should be a configuration function!");
        };

        return error.into();
    }

    let body = match inputs.len() {
        0 => quote! { #block },
        1 if matches!(inputs.first(), Some(syn::FnArg::Typed(_))) => quote! {
            (|#inputs| #block)(&__jsonmock_report);
        },
        _ => {
            return quote! {
                compile_error!("The test function should take nothing or a single &ReplayReport");
            }
            .into();
        }
    };

    let output = quote! {
        #[test]
        #(#attributes)*
        fn #name() {
            let mut __jsonmock_configuration = jsonmock::ReplayConfiguration::new(#data_file);
            #configuration_function(&mut __jsonmock_configuration);

            let __jsonmock_report = match jsonmock::run_replay_blocking(&__jsonmock_configuration) {
                Ok(report) => report,
                Err(e) => panic!("jsonmock error: {}", e),
            };
            if !__jsonmock_report.passed() {
                panic!("{}", __jsonmock_report);
            }

            #body
        }
    };

    TokenStream::from(output)
}

fn validate_data_path<P: AsRef<Path>>(
    path: P,
    span: Span,
) -> Result<(), proc_macro2::TokenStream> {
    if !path.as_ref().to_string_lossy().ends_with(".json") {
        return Err(quote_spanned! {span=>
            compile_error!("The path should point to a .json file!");
        });
    }

    Ok(())
}
