//! Fault barrier: a panic inside a long-running operation becomes an
//! [`Error::Fault`] for the caller instead of taking the host down.

use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;

use crate::error::{Error, Result};

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Drive `fut` on its own task. A panic is logged and returned as
/// [`Error::Fault`]; an aborted task reads as [`Error::Cancelled`].
pub async fn run_guarded<F, T>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let message = panic_message(&*e.into_panic());
            tracing::error!("Recovered from fault: {}", message);
            Err(Error::Fault { message })
        }
        Err(e) => {
            tracing::debug!("Guarded task ended early: {}", e);
            Err(Error::Cancelled)
        }
    }
}

/// Log every panic with its location and a captured backtrace. The
/// payload still unwinds to [`run_guarded`], which reports it.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = Backtrace::force_capture();
        tracing::error!("Panic: {}\n{}", info, backtrace);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let s: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(&*s), "static str");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*s), "owned");
        let s: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(&*s), "unknown panic");
    }

    #[tokio::test]
    async fn test_ok_and_err_pass_through() {
        assert_eq!(run_guarded(async { Ok(7) }).await.unwrap(), 7);
        let err = run_guarded(async { Err::<(), _>(Error::NotLoggedIn) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotLoggedIn));
    }

    #[tokio::test]
    async fn test_panic_becomes_fault() {
        let err = run_guarded(async {
            if true {
                panic!("boom {}", 1);
            }
            Ok(())
        })
        .await
        .unwrap_err();
        match err {
            Error::Fault { message } => assert_eq!(message, "boom 1"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
