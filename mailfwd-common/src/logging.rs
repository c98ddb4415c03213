use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($arg:tt)+) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($arg)+)
    }};
}

/// Events about notifications arriving on the dispatch path
#[macro_export]
macro_rules! inbound {
    (level = $level:ident, $($arg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "inbound", $($arg)+)
    };

    ($($arg:tt)+) => {
        $crate::inbound!(level = TRACE, $($arg)+)
    };
}

/// Events about work leaving the process (deliveries, republished entries)
#[macro_export]
macro_rules! outbound {
    (level = $level:ident, $($arg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "outbound", $($arg)+)
    };

    ($($arg:tt)+) => {
        $crate::outbound!(level = TRACE, $($arg)+)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($arg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($arg)+)
    };

    ($($arg:tt)+) => {
        $crate::internal!(level = TRACE, $($arg)+)
    };
}

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Compact,
    Json,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other}")),
        }
    }
}

fn level_from_env() -> LevelFilter {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    std::env::var("LOG_LEVEL").map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

fn format_from_env() -> Format {
    std::env::var("LOG_FORMAT").map_or_else(
        |_| Format::default(),
        |format| {
            format.parse().unwrap_or_else(|err| {
                eprintln!("{err}, defaulting to compact output");
                Format::default()
            })
        },
    )
}

/// Install the global subscriber.
///
/// `LOG_LEVEL` picks the maximum level and `LOG_FORMAT=json` switches to
/// newline-delimited JSON. Only events from `mailfwd*` targets are emitted.
pub fn init() {
    let level = level_from_env();
    let format = format_from_env();

    let only_ours = || FilterFn::new(|metadata| metadata.target().starts_with("mailfwd"));

    let compact = (format == Format::Compact).then(|| {
        tracing_subscriber::fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_ansi(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .with_filter(level)
            .with_filter(only_ours())
    });

    let json = (format == Format::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .with_filter(level)
            .with_filter(only_ours())
    });

    tracing_subscriber::Registry::default()
        .with(compact)
        .with(json)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("json".parse::<Format>(), Ok(Format::Json));
        assert_eq!("JSON".parse::<Format>(), Ok(Format::Json));
        assert_eq!("compact".parse::<Format>(), Ok(Format::Compact));
        assert_eq!("text".parse::<Format>(), Ok(Format::Compact));
        assert!("xml".parse::<Format>().is_err());
    }
}
