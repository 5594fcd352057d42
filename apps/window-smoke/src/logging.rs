//! Tracing bootstrap for the smoke binary. Logs go to stderr so stdout stays
//! a clean stream of JSON updates.

use std::env;

use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,window_core=debug,window_runtime=debug";
const FILTER_KEYS: [&str; 2] = ["RUST_LOG", "MODWINDOW_LOG"];

/// Where the active filter came from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterSource {
    Env(&'static str),
    Default,
}

impl FilterSource {
    fn name(&self) -> &'static str {
        match self {
            Self::Env(key) => key,
            Self::Default => "default",
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `MODWINDOW_LOG`;
/// unset, blank or unparsable values fall through to the default.
pub fn init() {
    let mut rejected = Vec::new();
    let (filter, source) = resolve_filter(|key| env::var(key).ok(), &mut rejected);

    let installed = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .is_ok();
    if !installed {
        return;
    }

    for (key, value) in rejected {
        warn!(key, %value, "ignoring invalid log filter");
    }
    debug!(source = source.name(), "logging initialised");
}

fn resolve_filter(
    lookup: impl Fn(&str) -> Option<String>,
    rejected: &mut Vec<(&'static str, String)>,
) -> (EnvFilter, FilterSource) {
    for key in FILTER_KEYS {
        let Some(value) = lookup(key).filter(|value| !value.trim().is_empty()) else {
            continue;
        };
        match EnvFilter::try_new(&value) {
            Ok(filter) => return (filter, FilterSource::Env(key)),
            Err(_) => rejected.push((key, value)),
        }
    }
    (EnvFilter::new(DEFAULT_FILTER), FilterSource::Default)
}
