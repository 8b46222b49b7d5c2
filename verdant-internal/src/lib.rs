pub mod auth; // bearer token issuance and subscription state
pub mod config; // gateway config file (tier limits, costs, store backend)
pub mod endpoints; // API endpoints
pub mod error; // error handling
pub mod fingerprint; // client fingerprint derivation
pub mod gateway_util; // utilities for gateway
pub mod observability; // utilities for observability (logs)
pub mod payments; // checkout session creation
pub mod quota; // quota engine and persistence port
