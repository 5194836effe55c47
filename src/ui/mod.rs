//! Terminal output with a plain fallback
//!
//! Uses `cliclack` log lines and spinners in an interactive terminal and
//! `[OK]`/`[FAIL]` prefixed lines in CI, so logs stay greppable.
//!
//! # Example
//!
//! ```rust,ignore
//! use shipcheck::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect().with_plain(args.plain);
//!
//! ui::intro(&ctx, "shipcheck run");
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Starting local registry...");
//! // ... do work ...
//! spinner.stop("Registry ready at http://localhost:4873");
//!
//! ui::step_error_detail(&ctx, "basic", "Test suite failed");
//! ui::outro_error(&ctx, "1 of 3 examples failed");
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    format_duration, intro, key_value, outro_error, outro_success, remark, section,
    step_error_detail, step_info, step_ok, step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::{ExampleProgress, TaskSpinner};
