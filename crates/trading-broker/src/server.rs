//! Broker server selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which broker environment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Server {
    Production,
    /// Simulated trading server of the broker
    #[default]
    Paper,
}

impl Server {
    pub fn rest_url(&self) -> &'static str {
        match self {
            Server::Production => "https://api.kiwoom.com",
            Server::Paper => "https://mockapi.kiwoom.com",
        }
    }

    pub fn ws_url(&self) -> &'static str {
        match self {
            Server::Production => "wss://api.kiwoom.com/v1/streaming",
            Server::Paper => "wss://mockapi.kiwoom.com/v1/streaming",
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth2/token", self.rest_url())
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Server::Production => write!(f, "production"),
            Server::Paper => write!(f, "paper"),
        }
    }
}

impl FromStr for Server {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" | "live" => Ok(Server::Production),
            "paper" | "mock" => Ok(Server::Paper),
            _ => Err(format!("Unknown server: {}", s)),
        }
    }
}
