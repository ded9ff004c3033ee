use crate::models::ExitReason;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitDecision {
    pub final_return: f64,
    pub reason: ExitReason,
}

/// Maps a raw cumulative return onto the realized return of the position.
///
/// Losses at or beyond the stop-loss are clamped to the floor. Otherwise the
/// highest take-profit tier reached wins and the return is clamped to that
/// tier. Anything in between closes at the raw value as a time exit.
/// `take_profits` is expected in ascending order; ranks are 1-based.
pub fn resolve(raw_performance: f64, stop_loss: f64, take_profits: &[f64]) -> ExitDecision {
    if raw_performance <= stop_loss {
        return ExitDecision {
            final_return: stop_loss,
            reason: ExitReason::StopLoss,
        };
    }

    for (idx, tp) in take_profits.iter().enumerate().rev() {
        if raw_performance >= *tp {
            return ExitDecision {
                final_return: *tp,
                reason: ExitReason::TakeProfit(idx + 1),
            };
        }
    }

    ExitDecision {
        final_return: raw_performance,
        reason: ExitReason::TimeExit,
    }
}

/// True once a running cumulative return has crossed the stop-loss floor or
/// the lowest take-profit ceiling.
pub fn crosses_boundary(cumulative: f64, stop_loss: f64, lowest_take_profit: Option<f64>) -> bool {
    if cumulative <= stop_loss {
        return true;
    }
    matches!(lowest_take_profit, Some(tp) if cumulative >= tp)
}
