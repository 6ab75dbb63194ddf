use async_nats::HeaderMap;
use bytes::Bytes;

/// A message headed for a subject on the bus.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Outgoing headers; the tracing layer adds trace context here
    pub headers: HeaderMap,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl AsRef<str>) -> Self {
        self.headers.insert(name, value.as_ref());
        self
    }
}

#[derive(Debug)]
pub struct PublishResponse {
    pub subject: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_header_accumulates() {
        let req = PublishRequest::new("pipeline.b", Bytes::from_static(b"{}"))
            .with_header("Message-Id", "abc")
            .with_header("Timestamp", 1_702_980_356_000i64.to_string());

        assert_eq!(req.subject, "pipeline.b");
        assert_eq!(req.headers.get("Message-Id").map(|v| v.as_str()), Some("abc"));
        assert_eq!(
            req.headers.get("Timestamp").map(|v| v.as_str()),
            Some("1702980356000")
        );
    }
}
