//! Logging shim: forwards to `defmt` on target, to `log` on host, or nowhere.

#![allow(unused_macros)]

macro_rules! sampler_log {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::$level!($s $(, $x)*);
        #[cfg(all(feature = "log", not(feature = "defmt")))]
        ::log::$level!($s $(, $x)*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ($(&$x,)*);
    }};
}

macro_rules! trace {
    ($($arg:tt)*) => { sampler_log!(trace, $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { sampler_log!(debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { sampler_log!(info, $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { sampler_log!(warn, $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { sampler_log!(error, $($arg)*) };
}
