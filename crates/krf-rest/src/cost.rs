//! Endpoint cost table.
//!
//! Every REST endpoint charges a pool-specific cost. Most costs are
//! static; batch orders scale with batch size and account-log pages
//! scale with the requested count.

use crate::limiter::Pool;

/// REST endpoints with their cost-determining parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    SendOrder,
    EditOrder,
    CancelOrder,
    /// Batch order with the number of contained order actions.
    BatchOrder { count: u32 },
    CancelAllOrders,
    Accounts,
    OpenPositions,
    OpenOrders,
    OrderStatus,
    /// Fills; passing `lastFillTime` is charged much higher.
    Fills { with_last_fill_time: bool },
    HistoryOrders,
    HistoryExecutions,
    /// Account log; cost tiers by requested entry count.
    AccountLog { count: u32 },
}

impl Endpoint {
    /// Endpoint path relative to the REST base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Self::SendOrder => "/derivatives/api/v3/sendorder",
            Self::EditOrder => "/derivatives/api/v3/editorder",
            Self::CancelOrder => "/derivatives/api/v3/cancelorder",
            Self::BatchOrder { .. } => "/derivatives/api/v3/batchorder",
            Self::CancelAllOrders => "/derivatives/api/v3/cancelallorders",
            Self::Accounts => "/derivatives/api/v3/accounts",
            Self::OpenPositions => "/derivatives/api/v3/openpositions",
            Self::OpenOrders => "/derivatives/api/v3/openorders",
            Self::OrderStatus => "/derivatives/api/v3/orders/status",
            Self::Fills { .. } => "/derivatives/api/v3/fills",
            Self::HistoryOrders => "/api/history/v2/orders",
            Self::HistoryExecutions => "/api/history/v2/executions",
            Self::AccountLog { .. } => "/api/history/v2/account-log",
        }
    }

    /// Which pool the endpoint draws from.
    pub fn pool(&self) -> Pool {
        match self {
            Self::HistoryOrders | Self::HistoryExecutions | Self::AccountLog { .. } => {
                Pool::History
            }
            _ => Pool::Derivatives,
        }
    }

    /// Cost in pool units for one call.
    pub fn cost(&self) -> u32 {
        match self {
            Self::SendOrder | Self::EditOrder | Self::CancelOrder => 10,
            Self::BatchOrder { count } => 9 + count,
            Self::CancelAllOrders => 25,
            Self::Accounts | Self::OpenPositions | Self::OpenOrders => 2,
            Self::OrderStatus => 1,
            Self::Fills {
                with_last_fill_time,
            } => {
                if *with_last_fill_time {
                    25
                } else {
                    2
                }
            }
            Self::HistoryOrders | Self::HistoryExecutions => 1,
            Self::AccountLog { count } => match count {
                0..=25 => 1,
                26..=50 => 2,
                51..=1000 => 3,
                1001..=5000 => 6,
                _ => 10,
            },
        }
    }
}
