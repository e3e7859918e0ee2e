//! Process-wide `tracing` subscriber.
//!
//! Logs go to stderr so stdout stays free for console replies.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "hahub_server=info,hahub_core=info,hahub=info";

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter is malformed or a subscriber is already set.
pub fn init(json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER)?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };
    installed.map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn second_init_fails() {
        // Whichever call wins, the other must report the conflict.
        let first = init(false);
        let second = init(true);
        assert!(first.is_err() || second.is_err());
    }
}
