use std::fmt;

use thiserror::Error;

/// Order lifecycle status. Transitions only move forward along the DAG in
/// `allowed_targets`; `failed`, `cancelled` and `delivered` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
    Sent,
    Shipped,
    Delivered,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Success,
        OrderStatus::Failed,
        OrderStatus::Cancelled,
        OrderStatus::Sent,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Success => "success",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Sent => "sent",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    pub fn allowed_targets(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[
                OrderStatus::Success,
                OrderStatus::Failed,
                OrderStatus::Cancelled,
            ],
            OrderStatus::Success => &[
                OrderStatus::Sent,
                OrderStatus::Shipped,
                OrderStatus::Delivered,
            ],
            OrderStatus::Sent => &[OrderStatus::Shipped, OrderStatus::Delivered],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Failed | OrderStatus::Cancelled | OrderStatus::Delivered => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Failed | OrderStatus::Cancelled | OrderStatus::Delivered
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid order status '{0}'")]
    InvalidStatus(String),

    #[error("Order is in terminal status '{current}' and can no longer change")]
    TerminalState { current: OrderStatus },

    #[error(
        "Cannot change status from '{from}' to '{to}'. Valid transitions from '{from}': {}",
        format_targets(.from)
    )]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
}

fn format_targets(from: &OrderStatus) -> String {
    from.allowed_targets()
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
}

/// Validate a requested status transition. Pure: returns the change to apply,
/// persistence is the caller's job. Every code path that mutates an order's
/// status must go through here.
pub fn transition(
    current: OrderStatus,
    requested: OrderStatus,
) -> Result<StatusChange, TransitionError> {
    if current.is_terminal() {
        return Err(TransitionError::TerminalState { current });
    }
    if !current.allowed_targets().contains(&requested) {
        return Err(TransitionError::IllegalTransition {
            from: current,
            to: requested,
        });
    }
    Ok(StatusChange {
        old_status: current,
        new_status: requested,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_every_status() {
        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("paid"), None);
        assert_eq!(OrderStatus::parse(""), None);
    }

    #[test]
    fn pending_can_settle_three_ways() {
        for target in [
            OrderStatus::Success,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
        ] {
            let change = transition(OrderStatus::Pending, target).unwrap();
            assert_eq!(change.old_status, OrderStatus::Pending);
            assert_eq!(change.new_status, target);
        }
    }

    #[test]
    fn fulfillment_chain_is_monotonic() {
        let chain = [
            OrderStatus::Success,
            OrderStatus::Sent,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ];
        for pair in chain.windows(2) {
            transition(pair[0], pair[1]).unwrap();
        }
        // Skipping forward is allowed; moving backward never is.
        transition(OrderStatus::Success, OrderStatus::Delivered).unwrap();
        transition(OrderStatus::Sent, OrderStatus::Delivered).unwrap();
        assert!(transition(OrderStatus::Shipped, OrderStatus::Sent).is_err());
        assert!(transition(OrderStatus::Sent, OrderStatus::Success).is_err());
    }

    #[test]
    fn terminal_statuses_reject_everything() {
        for terminal in [
            OrderStatus::Failed,
            OrderStatus::Cancelled,
            OrderStatus::Delivered,
        ] {
            for target in OrderStatus::ALL {
                assert_eq!(
                    transition(terminal, target),
                    Err(TransitionError::TerminalState { current: terminal }),
                );
            }
        }
    }

    #[test]
    fn pending_cannot_skip_to_fulfillment() {
        let err = transition(OrderStatus::Pending, OrderStatus::Shipped).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'pending'"));
        assert!(message.contains("'shipped'"));
        assert!(message.contains("success, failed, cancelled"));
    }

    #[test]
    fn re_entering_the_same_status_is_illegal() {
        assert!(matches!(
            transition(OrderStatus::Success, OrderStatus::Success),
            Err(TransitionError::IllegalTransition { .. })
        ));
    }
}
