use std::collections::HashMap;

use prova_core::Event;

use crate::error::{Result, WebhookError};

/// Read-only view over request headers, so adapters stay independent of any
/// HTTP framework.
pub trait HeaderReader {
    fn get(&self, key: &str) -> Option<&str>;
}

impl HeaderReader for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).map(String::as_str)
    }
}

/// The capability set a webhook provider adapter advertises.
///
/// `parse` is a pure function from the provider payload to canonical events;
/// authorization and parsing never touch storage.
pub trait WebhookAdapter: Send + Sync {
    /// Stable provider id, e.g. `github`.
    fn provider(&self) -> &str;

    /// Header carrying the provider's event type.
    fn event_type_header(&self) -> &str;

    /// Header carrying the provider's delivery/event id.
    fn event_id_header(&self) -> &str;

    /// Checks the request's signature or shared token.
    fn authorize(&self, headers: &dyn HeaderReader, body: &[u8]) -> Result<()>;

    /// Decodes a provider payload into canonical events.
    fn parse(&self, event_type: &str, event_id: &str, body: &[u8]) -> Result<Vec<Event>>;
}

/// Runtime registry of webhook adapters, keyed by lowercased provider id.
#[derive(Default)]
pub struct Registry {
    providers: HashMap<String, Box<dyn WebhookAdapter>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Box<dyn WebhookAdapter>) {
        self.providers
            .insert(adapter.provider().trim().to_lowercase(), adapter);
    }

    pub fn adapter(&self, provider: &str) -> Result<&dyn WebhookAdapter> {
        self.providers
            .get(&provider.trim().to_lowercase())
            .map(Box::as_ref)
            .ok_or_else(|| WebhookError::UnsupportedProvider(provider.to_owned()))
    }

    pub fn authorize(
        &self,
        provider: &str,
        headers: &dyn HeaderReader,
        body: &[u8],
    ) -> Result<()> {
        self.adapter(provider)?.authorize(headers, body)
    }

    pub fn parse(
        &self,
        provider: &str,
        event_type: &str,
        event_id: &str,
        body: &[u8],
    ) -> Result<Vec<Event>> {
        self.adapter(provider)?.parse(event_type, event_id, body)
    }

    /// Authorizes and parses in one step, reading the provider's declared
    /// headers from the request.
    pub fn parse_from_headers(
        &self,
        provider: &str,
        headers: &dyn HeaderReader,
        body: &[u8],
    ) -> Result<Vec<Event>> {
        let adapter = self.adapter(provider)?;
        adapter.authorize(headers, body)?;
        let event_type = headers.get(adapter.event_type_header()).unwrap_or_default();
        let event_id = headers.get(adapter.event_id_header()).unwrap_or_default();
        adapter.parse(event_type, event_id, body)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::valid_sha256_signature;

    use super::*;

    struct PushAdapter {
        secret: String,
    }

    impl WebhookAdapter for PushAdapter {
        fn provider(&self) -> &str {
            "github"
        }

        fn event_type_header(&self) -> &str {
            "X-GitHub-Event"
        }

        fn event_id_header(&self) -> &str {
            "X-GitHub-Delivery"
        }

        fn authorize(&self, headers: &dyn HeaderReader, body: &[u8]) -> Result<()> {
            let header = headers.get("X-Hub-Signature-256").unwrap_or_default();
            if !valid_sha256_signature(&self.secret, body, header) {
                return Err(WebhookError::Unauthorized(
                    "invalid webhook signature".to_owned(),
                ));
            }
            Ok(())
        }

        fn parse(&self, event_type: &str, event_id: &str, _body: &[u8]) -> Result<Vec<Event>> {
            let event = Event::new(format!("evt_github_{event_id}"), "github", event_type)
                .subject("payments-api")
                .raw_data(r#"{"repo":"o/p"}"#)?
                .ensure_integrity()?;
            Ok(vec![event])
        }
    }

    fn signed_headers(secret: &str, body: &[u8]) -> HashMap<String, String> {
        use hmac::Mac;
        let mut mac =
            hmac::Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        HashMap::from([
            (
                "X-Hub-Signature-256".to_owned(),
                format!("sha256={}", hex::encode(mac.finalize().into_bytes())),
            ),
            ("X-GitHub-Event".to_owned(), "push".to_owned()),
            ("X-GitHub-Delivery".to_owned(), "d-1".to_owned()),
        ])
    }

    #[test]
    fn registry_dispatches_by_provider_id() {
        let mut registry = Registry::new();
        registry.register(Box::new(PushAdapter {
            secret: "s3cret".to_owned(),
        }));

        let body = br#"{"after":"abc123"}"#;
        let headers = signed_headers("s3cret", body);

        let events = registry
            .parse_from_headers("GitHub", &headers, body)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "evt_github_d-1");
        assert_eq!(events[0].ty, "push");

        assert!(matches!(
            registry.adapter("gitlab"),
            Err(WebhookError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn authorization_failures_stop_parsing() {
        let mut registry = Registry::new();
        registry.register(Box::new(PushAdapter {
            secret: "s3cret".to_owned(),
        }));

        let body = br#"{"after":"abc123"}"#;
        let mut headers = signed_headers("s3cret", body);
        headers.insert("X-Hub-Signature-256".to_owned(), "sha256=00".to_owned());

        assert!(matches!(
            registry.parse_from_headers("github", &headers, body),
            Err(WebhookError::Unauthorized(_))
        ));
    }
}
