#[macro_export]
macro_rules! regex {
    ($pat:literal) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new($pat).unwrap());
        &*RE
    }};
}

/// Print a trace line to stderr when `CUBE_DEBUG_SEARCH` is set.
///
/// Arguments are only formatted when tracing is enabled.
macro_rules! search_debug {
    ($($arg:tt)*) => {
        if *$crate::engine::DEBUG_SEARCH {
            eprintln!($($arg)*);
        }
    };
}
