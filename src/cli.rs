#[cfg(feature = "progress")]
#[derive(clap::ValueEnum, Debug, Clone)]
pub enum ProgressOption {
    On,
    Off,
    /// Enable if stderr is a terminal
    Auto,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ArgProgress {
    /// Display transfer progress
    #[cfg(feature = "progress")]
    #[clap(long, short = 'P', value_enum, default_value = "auto")]
    progress: ProgressOption,
}

/// Callbacks a transfer issues as it moves through its stages
#[derive(Debug)]
pub enum Update {
    Stage(&'static str),
    Total(usize),
    Transferred(usize),
    Done,
    Failed(String),
}

fn stderr_println(prefix: &impl std::fmt::Display, args: std::fmt::Arguments) {
    eprintln!("{prefix}{args}");
}

/// Use only if no Output extant
pub fn println_error(args: std::fmt::Arguments) {
    stderr_println(&PREFIX_ERROR, args)
}

#[cfg(feature = "progress")]
mod progress_enabled {
    use std::sync::Arc;

    use super::*;

    pub type ProgressFn = Arc<dyn Fn(Update) + Send + Sync + 'static>;

    pub const PREFIX_ERROR: console::Emoji = console::Emoji("❌ ", "");
    pub const PREFIX_DONE: console::Emoji = console::Emoji("✅ ", "");

    const BAR_TEMPLATE: &str =
        "{prefix:>24.bold} {msg:.dim} {bytes:>9}/{total_bytes:<9} {elapsed:>4} {wide_bar:.green/238}";

    pub fn null_progress_fn() -> ProgressFn {
        Arc::new(|_update: Update| {})
    }

    pub struct Output {
        enabled: bool,
    }

    impl Output {
        pub fn new(args: &ArgProgress) -> Output {
            let enabled = match args.progress {
                ProgressOption::On => true,
                ProgressOption::Off => false,
                ProgressOption::Auto => console::user_attended() && console::user_attended_stderr(),
            };
            Output { enabled }
        }
        pub fn progress_enabled(&self) -> bool {
            self.enabled
        }
        /// One bar for one transfer; transfers run strictly one at a
        /// time, so callers suppress their own println reporting while
        /// a bar is live.
        pub fn begin(&self, stage: &'static str, name: String) -> ProgressFn {
            if !self.enabled {
                return null_progress_fn();
            }

            let draw_target = indicatif::ProgressDrawTarget::stderr_with_hz(6);
            let bar = indicatif::ProgressBar::with_draw_target(Some(1), draw_target)
                .with_prefix(name)
                .with_message(stage);
            bar.set_style(
                indicatif::ProgressStyle::with_template(BAR_TEMPLATE)
                    .expect("valid template")
                    .progress_chars("=> "),
            );

            Arc::new(move |update: Update| match update {
                Update::Stage(stage) => bar.set_message(stage),
                Update::Total(total) => bar.set_length(total as u64),
                Update::Transferred(bytes) => bar.inc(bytes as u64),
                Update::Done => bar.finish_with_message("done"),
                Update::Failed(err) => bar.abandon_with_message(format!("{PREFIX_ERROR}failed: {err}")),
            })
        }
        pub fn println_error(&self, args: std::fmt::Arguments) {
            stderr_println(&PREFIX_ERROR, args);
        }
        pub fn println_done(&self, args: std::fmt::Arguments) {
            stderr_println(&PREFIX_DONE, args);
        }
    }
}

#[cfg(feature = "progress")]
pub use progress_enabled::*;

#[cfg(not(feature = "progress"))]
mod progress_disabled {
    use super::*;

    pub fn empty_progress_fn(_update: Update) {}
    pub type ProgressFn = fn(Update);

    pub const PREFIX_ERROR: &str = "❌ ";
    pub const PREFIX_DONE: &str = "✅ ";

    pub fn null_progress_fn() -> ProgressFn {
        empty_progress_fn
    }

    #[derive(Default)]
    pub struct Output {}

    impl Output {
        pub fn new(_args: &ArgProgress) -> Output {
            Output {}
        }
        pub fn progress_enabled(&self) -> bool {
            false
        }
        pub fn begin(&self, _stage: &'static str, _name: String) -> ProgressFn {
            empty_progress_fn
        }
        pub fn println_error(&self, args: std::fmt::Arguments) {
            stderr_println(&PREFIX_ERROR, args);
        }
        pub fn println_done(&self, args: std::fmt::Arguments) {
            stderr_println(&PREFIX_DONE, args);
        }
    }
}

#[cfg(not(feature = "progress"))]
pub use progress_disabled::*;
