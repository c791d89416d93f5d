//! Resilient API client layer: per-endpoint rate governance, in-flight request deduplication,
//! single-flight credential refresh, bounded retries, and a normalized error taxonomy sitting
//! between every outgoing request and the network transport.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod normalize;
pub mod notify;
pub mod obs;
pub mod policy;
pub mod rate_limit;
pub mod request;

pub use coordinator::{ClientConfig, RequestCoordinator};
pub use error::{AppError, ErrorCode};
pub use request::{ApiResponse, Method, RequestSpec};

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::OffsetDateTime;
	pub use tokio::time::Instant;

	pub use crate::error::{AppError, ErrorCode, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
#[cfg(feature = "reqwest")] pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
