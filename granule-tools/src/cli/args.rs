pub use clap::{App, Arg};

#[macro_export]
macro_rules! args_parser {
    ($name:expr) => {{
        $crate::cli::args::App::new($name)
            .version(clap::crate_version!())
            .author(clap::crate_authors!())
    }};
}

#[macro_export]
macro_rules! arg {
    ($name:expr) => {{
        $crate::cli::args::Arg::with_name($name)
    }};
}

#[macro_export]
macro_rules! opt {
    ($name:expr) => {{
        $crate::cli::args::Arg::with_name($name)
            .long($name)
            .value_name($name)
    }};
}
