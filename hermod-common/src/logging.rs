//! Log categories and the global subscriber.
//!
//! Events raised through [`internal!`](crate::internal), [`incoming!`](crate::incoming) and
//! [`outgoing!`](crate::outgoing) carry the target `hermod::<category>`. Besides `LOG_LEVEL`,
//! the subscriber honours `LOG_CATEGORIES`, a comma separated list of the categories to show:
//! `LOG_CATEGORIES=internal` keeps the server's own events and hides the wire traffic.

use std::{io::IsTerminal, str::FromStr};

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[doc(hidden)]
#[macro_export]
macro_rules! log {
    ($level:expr, $category:literal, $($msg:expr),*) => {
        $crate::tracing::event!(target: concat!("hermod::", $category), $level, $($msg),*)
    };
}

/// Lines written to a peer.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

/// Lines read from a peer.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

/// Everything else the server has to say about itself.
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Internal,
    Incoming,
    Outgoing,
}

impl Category {
    pub const ALL: [Self; 3] = [Self::Internal, Self::Incoming, Self::Outgoing];

    /// The event target the category macros use.
    #[must_use]
    pub const fn target(self) -> &'static str {
        match self {
            Self::Internal => "hermod::internal",
            Self::Incoming => "hermod::incoming",
            Self::Outgoing => "hermod::outgoing",
        }
    }

    fn of_target(target: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.target() == target)
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "internal" => Ok(Self::Internal),
            "incoming" => Ok(Self::Incoming),
            "outgoing" => Ok(Self::Outgoing),
            other => Err(format!("Unknown log category {other}")),
        }
    }
}

fn parse_level(requested: Option<&str>, default: LevelFilter) -> LevelFilter {
    requested.map_or(default, |level| {
        LevelFilter::from_str(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

/// Unknown names are reported and skipped. Nothing usable selects every category.
fn parse_categories(requested: Option<&str>) -> Vec<Category> {
    let categories: Vec<Category> = requested
        .into_iter()
        .flat_map(|list| list.split(','))
        .filter(|name| !name.trim().is_empty())
        .filter_map(|name| {
            name.parse()
                .inspect_err(|err| eprintln!("{err}, ignoring it"))
                .ok()
        })
        .collect();

    if categories.is_empty() {
        Category::ALL.to_vec()
    } else {
        categories
    }
}

/// Category events are shown when selected. Spans and events from instrumented hermod code
/// are always shown, and nothing from other crates is.
fn is_shown(target: &str, categories: &[Category]) -> bool {
    Category::of_target(target).map_or_else(
        || target.starts_with("hermod"),
        |category| categories.contains(&category),
    )
}

/// Installs the global subscriber, writing to stderr.
pub fn init() {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let level = parse_level(std::env::var("LOG_LEVEL").ok().as_deref(), default);
    let categories = parse_categories(std::env::var("LOG_CATEGORIES").ok().as_deref());

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(move |metadata| {
                    is_shown(metadata.target(), &categories)
                })),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn levels() {
        assert_eq!(parse_level(None, LevelFilter::INFO), LevelFilter::INFO);
        assert_eq!(parse_level(Some("debug"), LevelFilter::INFO), LevelFilter::DEBUG);
        assert_eq!(parse_level(Some("loud"), LevelFilter::WARN), LevelFilter::WARN);
    }

    #[test]
    fn categories() {
        assert_eq!(parse_categories(None), Category::ALL.to_vec());
        assert_eq!(
            parse_categories(Some("Internal, outgoing")),
            vec![Category::Internal, Category::Outgoing]
        );
        assert_eq!(
            parse_categories(Some("incoming,chatter")),
            vec![Category::Incoming]
        );
        assert_eq!(parse_categories(Some(" , chatter")), Category::ALL.to_vec());
    }

    #[test]
    fn unselected_categories_are_hidden() {
        let internal_only = [Category::Internal];

        assert!(is_shown("hermod::internal", &internal_only));
        assert!(!is_shown("hermod::incoming", &internal_only));
        assert!(!is_shown("hermod::outgoing", &internal_only));
        assert!(is_shown("hermod_smtp::session", &internal_only));
        assert!(!is_shown("tokio::runtime", &Category::ALL));
    }
}
