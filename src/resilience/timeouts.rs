//! Time budgets for recovery work.
//!
//! Every remediation step runs under an explicit deadline. Overrunning it is
//! an ordinary outcome the caller reports, not an exception.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("budget of {}ms exceeded", .budget.as_millis())]
pub struct BudgetExceeded {
    pub budget: Duration,
}

/// Run `fut` to completion or give up once `budget` has elapsed.
pub async fn within_budget<F, T>(budget: Duration, fut: F) -> Result<T, BudgetExceeded>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(budget, fut)
        .await
        .map_err(|_| BudgetExceeded { budget })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_overrun_is_reported() {
        let result = within_budget(Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            42
        })
        .await;
        assert_eq!(result, Err(BudgetExceeded { budget: Duration::from_secs(5) }));
    }

    #[tokio::test]
    async fn test_completes_within_budget() {
        let result = within_budget(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }
}
