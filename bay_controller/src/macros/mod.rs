/// Logs the result of a call whose error is not propagated.
/// `warn` downgrades failures that the next tick or periodic send will retry.
#[macro_export]
macro_rules! log_error {
    ($stage:expr, $expr:expr) => {
        match $expr {
            Ok(_) => log::trace!("{} Ok()", $stage),
            Err(error) => log::error!("{} {}", $stage, error),
        }
    };
    ($stage:expr, $expr:expr, warn) => {
        match $expr {
            Ok(_) => log::trace!("{} Ok()", $stage),
            Err(error) => log::warn!("{} {}", $stage, error),
        }
    };
}
