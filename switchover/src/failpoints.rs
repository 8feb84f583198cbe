use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, SwoResult};

/// Fires after every node acknowledged the pause, before the cutover runs.
pub const EXECUTE_AFTER_PAUSE: &str = "switchover.execute.after_pause";

/// Fires after the cutover committed, before the resume broadcast.
pub const EXECUTE_BEFORE_RESUME: &str = "switchover.execute.before_resume";

/// Returns an error when the failpoint `name` is configured to fire.
///
/// Compiles to a no-op unless the `failpoints` feature is enabled.
pub fn swo_fail_point(name: &str) -> SwoResult<()> {
    fail_point!(name, |_| {
        bail!(
            ErrorKind::ExecutionFailed,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
