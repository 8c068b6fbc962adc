/// One outgoing replay request: GET without a body, POST with one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestData {
    pub url: String,
    pub body: Option<String>,
}

impl RequestData {
    pub fn method(&self) -> &'static str {
        match self.body {
            Some(_) => "POST",
            None => "GET",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseData {
    pub status_code: u16,
    pub body: String,
}
