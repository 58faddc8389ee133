//! Placeholder handler that always declines.
//!
//! Registered for schemes whose real transport is not compiled in (FTP by
//! default), so the aggregated dispatch error names the actual reason
//! instead of a bare "scheme not supported".

use async_trait::async_trait;

use crate::error::Error;
use crate::handler::{Extension, Feature, RequestHandler};
use crate::request::Request;
use crate::response::Response;

/// A handler that declines every request it is asked about.
pub struct UnsupportedHandler {
    name: String,
    schemes: Vec<&'static str>,
    reason: String,
}

impl UnsupportedHandler {
    /// Creates a placeholder for a set of schemes with a rejection reason.
    pub fn new(
        name: impl Into<String>,
        schemes: Vec<&'static str>,
        reason: impl Into<String>,
    ) -> Self {
        UnsupportedHandler {
            name: name.into(),
            schemes,
            reason: reason.into(),
        }
    }

    /// The default FTP placeholder.
    pub fn ftp() -> Self {
        UnsupportedHandler::new(
            "ftp",
            vec!["ftp"],
            "no FTP transport is compiled in",
        )
    }
}

#[async_trait]
impl RequestHandler for UnsupportedHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_schemes(&self) -> &[&str] {
        &self.schemes
    }

    fn supported_proxy_schemes(&self) -> &[&str] {
        &[]
    }

    fn supported_features(&self) -> &[Feature] {
        &[]
    }

    fn supported_extensions(&self) -> &[Extension] {
        &[]
    }

    fn prepare(&self, request: &mut Request) -> Result<(), Error> {
        let scheme = request.url().scheme().to_ascii_lowercase();
        if self.schemes.iter().any(|s| s.eq_ignore_ascii_case(&scheme)) {
            Err(Error::unsupported(self.reason.clone()))
        } else {
            Err(Error::unsupported(format!("{scheme} scheme is not supported")))
        }
    }

    async fn handle(&self, _request: Request) -> Result<Response, Error> {
        Err(Error::unsupported(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_scheme_gets_the_specific_reason() {
        let handler = UnsupportedHandler::ftp();
        let mut request = Request::new("ftp://example.com/file").unwrap();
        let err = handler.prepare(&mut request).unwrap_err();
        assert!(err.to_string().contains("no FTP transport is compiled in"));
    }

    #[test]
    fn other_schemes_get_the_generic_rejection() {
        let handler = UnsupportedHandler::ftp();
        let mut request = Request::new("http://example.com").unwrap();
        let err = handler.prepare(&mut request).unwrap_err();
        assert!(err.to_string().contains("http scheme is not supported"));
    }
}
