//! Structured logging to stderr.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "fieldvisit=debug"
    } else {
        "fieldvisit=info"
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// keep the existing subscriber.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_lowers_the_level() {
        assert_eq!(default_directive(false), "fieldvisit=info");
        assert_eq!(default_directive(true), "fieldvisit=debug");
    }

    #[test]
    fn repeated_init_is_harmless() {
        init(false);
        init(true);
    }
}
