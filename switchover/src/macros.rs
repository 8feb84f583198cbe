//! Macros for switchover error handling.

/// Creates a [`crate::error::SwoError`] from an error kind and a static description.
///
/// Accepts an optional dynamic detail (`detail = owned_string` moves it, a bare
/// expression is rendered with `to_string`) and an optional `source:`.
#[macro_export]
macro_rules! swo_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::SwoError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::SwoError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        $crate::error::SwoError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        $crate::error::SwoError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::SwoError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::SwoError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Returns early with a [`crate::error::SwoError`], same arguments as [`swo_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::swo_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::swo_error!($kind, $desc, source: $source))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        return ::core::result::Result::Err($crate::swo_error!($kind, $desc, detail = $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::swo_error!($kind, $desc, $detail))
    };
}
