use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::clock::Clock;
use crate::error::AppResult;
use crate::repository::InventoryStore;

/// Физическое удаление истёкших холдов.
///
/// На корректность не влияет: истёкший холд и так не учитывается в остатках,
/// проход только освобождает место в таблице.
pub struct HoldSweeper {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
}

impl HoldSweeper {
    pub fn new(store: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn run_sweep(&self) -> AppResult<SweepStats> {
        let now = self.clock.now();
        let deleted = self.store.purge_expired(now).await?;

        if deleted == 0 {
            info!("🧹 No expired holds to sweep");
        } else {
            info!("🧹 Swept {} expired holds", deleted);
        }

        Ok(SweepStats { deleted })
    }

    /// Сколько истёкших холдов ждёт следующего прохода.
    pub async fn stats(&self) -> AppResult<PendingSweep> {
        let expired = self.store.count_expired(self.clock.now()).await?;
        Ok(PendingSweep { expired })
    }

    /// Бесконечный цикл для фоновой задачи; ошибки прохода логируются, цикл продолжается.
    pub async fn run_periodically(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = self.run_sweep().await {
                error!("🧹 Hold sweep failed: {}", e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SweepStats {
    pub deleted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSweep {
    pub expired: u64,
}
