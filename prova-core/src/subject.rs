use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// The compound scope of every primary query, parsed from the colon-joined
/// form `app:environment:cluster`. All three components are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub app: String,
    pub environment: String,
    pub cluster: String,
}

impl Subject {
    pub fn new(
        app: impl Into<String>,
        environment: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            app: app.into(),
            environment: environment.into(),
            cluster: cluster.into(),
        }
    }
}

impl FromStr for Subject {
    type Err = EventError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parts = input.splitn(3, ':');
        let app = parts.next().unwrap_or_default().trim();
        let environment = parts.next().unwrap_or_default().trim();
        let cluster = parts.next().unwrap_or_default().trim();

        if app.is_empty() || environment.is_empty() || cluster.is_empty() {
            return Err(EventError::InvalidSubject(input.to_owned()));
        }

        Ok(Self::new(app, environment, cluster))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.app, self.environment, self.cluster)
    }
}
