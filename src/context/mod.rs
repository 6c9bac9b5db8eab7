//! Per-request context handed to routes and middleware.

use serde::de::DeserializeOwned;

use crate::Request;

/// Owns the request while it travels through the middleware pipeline.
#[derive(Debug)]
pub struct Context {
    request: Request,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn into_request(self) -> Request {
        self.request
    }

    /// Deserializes the request body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.request.body())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Body {
        query: String,
    }

    fn context(raw: &[u8]) -> Context {
        Context::new(Request::parse(raw).unwrap().0)
    }

    #[test]
    fn json_body() {
        let ctx = context(
            b"POST /graphql HTTP/1.1\r\nContent-Length: 21\r\n\r\n{\"query\":\"{ hello }\"}",
        );
        assert_eq!(
            ctx.json::<Body>().unwrap(),
            Body {
                query: "{ hello }".into()
            }
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        let ctx = context(b"POST /graphql HTTP/1.1\r\nContent-Length: 3\r\n\r\n{{{");
        assert!(ctx.json::<Body>().is_err());
        assert_eq!(ctx.into_request().path(), "/graphql");
    }
}
