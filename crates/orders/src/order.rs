use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_catalog::{PriceSnapshot, StockKey};
use storefront_core::{
    Aggregate, AggregateRoot, CouponId, DomainError, Money, OrderId, UserCouponId, UserId,
};
use storefront_events::Event;

use crate::delivery::Delivery;
use crate::number::OrderNo;
use crate::pricing::OrderTotals;
use crate::status::OrderStatus;

/// One ordered line with its price snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub snapshot: PriceSnapshot,
    pub quantity: u32,
}

impl OrderLine {
    pub fn stock_key(&self) -> StockKey {
        StockKey {
            product_id: self.snapshot.product_id,
            variant_id: self.snapshot.variant_id,
        }
    }

    pub fn list_total(&self) -> Money {
        self.snapshot.list_price.times(self.quantity)
    }

    pub fn markdown_total(&self) -> Money {
        self.snapshot
            .list_price
            .saturating_sub(self.snapshot.sale_price)
            .times(self.quantity)
    }
}

/// The coupon instance applied to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponUse {
    pub coupon_id: CouponId,
    pub user_coupon_id: UserCouponId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsRequirement {
    pub required_points: u64,
    pub user_points_at_creation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub transaction_id: String,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub amount: Money,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    /// Last gateway failure, kept until an operator resolves it.
    pub failure: Option<String>,
    pub gateway_refund_id: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserRequested,
    PaymentWindowExpired,
    /// Placed after the reconciliation sweep had already released its
    /// reservations; the order never reached the buyer.
    CheckoutAbandoned,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    order_no: Option<OrderNo>,
    user_id: Option<UserId>,
    lines: Vec<OrderLine>,
    delivery: Option<Delivery>,
    totals: Option<OrderTotals>,
    coupon: Option<CouponUse>,
    points: Option<PointsRequirement>,
    status: OrderStatus,
    placed_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    payment: Option<PaymentRecord>,
    preparing_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    tracking_no: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<CancelReason>,
    refund: Option<RefundRecord>,
    compensated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            order_no: None,
            user_id: None,
            lines: Vec::new(),
            delivery: None,
            totals: None,
            coupon: None,
            points: None,
            status: OrderStatus::Unpaid,
            placed_at: None,
            expires_at: None,
            payment: None,
            preparing_at: None,
            shipped_at: None,
            tracking_no: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            refund: None,
            compensated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn order_no(&self) -> Option<&OrderNo> {
        self.order_no.as_ref()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn delivery(&self) -> Option<&Delivery> {
        self.delivery.as_ref()
    }

    pub fn totals(&self) -> Option<&OrderTotals> {
        self.totals.as_ref()
    }

    pub fn pay_amount(&self) -> Money {
        self.totals.map(|t| t.pay_amount).unwrap_or(Money::ZERO)
    }

    pub fn coupon(&self) -> Option<CouponUse> {
        self.coupon
    }

    pub fn points(&self) -> Option<PointsRequirement> {
        self.points
    }

    /// Whether the user's balance at creation covered the required points.
    pub fn points_sufficient(&self) -> bool {
        self.points
            .map(|p| p.user_points_at_creation >= p.required_points)
            .unwrap_or(true)
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn payment(&self) -> Option<&PaymentRecord> {
        self.payment.as_ref()
    }

    pub fn preparing_at(&self) -> Option<DateTime<Utc>> {
        self.preparing_at
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn tracking_no(&self) -> Option<&str> {
        self.tracking_no.as_deref()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason
    }

    pub fn refund(&self) -> Option<&RefundRecord> {
        self.refund.as_ref()
    }

    pub fn compensated_at(&self) -> Option<DateTime<Utc>> {
        self.compensated_at
    }

    /// Unpaid and past its payment window at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Unpaid && self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Stock/coupon commitments still need to be given back.
    pub fn needs_compensation(&self) -> bool {
        self.created && self.status.requires_compensation() && self.compensated_at.is_none()
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder. Amounts are computed by the checkout orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub order_no: OrderNo,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub delivery: Delivery,
    pub totals: OrderTotals,
    pub coupon: Option<CouponUse>,
    pub points: PointsRequirement,
    pub placed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPayment {
    pub order_id: OrderId,
    pub transaction_id: String,
    pub paid_amount: Money,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub reason: CancelReason,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPreparing {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipOrder {
    pub order_id: OrderId,
    pub tracking_no: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRefund {
    pub order_id: OrderId,
    pub amount: Money,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRefundFailure {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteRefund {
    pub order_id: OrderId,
    pub gateway_refund_id: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkCompensated {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    ConfirmPayment(ConfirmPayment),
    CancelOrder(CancelOrder),
    StartPreparing(StartPreparing),
    ShipOrder(ShipOrder),
    CompleteOrder(CompleteOrder),
    RequestRefund(RequestRefund),
    RecordRefundFailure(RecordRefundFailure),
    CompleteRefund(CompleteRefund),
    MarkCompensated(MarkCompensated),
}

impl OrderCommand {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderCommand::PlaceOrder(c) => c.order_id,
            OrderCommand::ConfirmPayment(c) => c.order_id,
            OrderCommand::CancelOrder(c) => c.order_id,
            OrderCommand::StartPreparing(c) => c.order_id,
            OrderCommand::ShipOrder(c) => c.order_id,
            OrderCommand::CompleteOrder(c) => c.order_id,
            OrderCommand::RequestRefund(c) => c.order_id,
            OrderCommand::RecordRefundFailure(c) => c.order_id,
            OrderCommand::CompleteRefund(c) => c.order_id,
            OrderCommand::MarkCompensated(c) => c.order_id,
        }
    }
}

/// Event: OrderPlaced (status `unpaid`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub order_no: OrderNo,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub delivery: Delivery,
    pub totals: OrderTotals,
    pub coupon: Option<CouponUse>,
    pub points: PointsRequirement,
    pub placed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaid {
    pub order_id: OrderId,
    pub transaction_id: String,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub reason: CancelReason,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparationStarted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: OrderId,
    pub tracking_no: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequested {
    pub order_id: OrderId,
    pub amount: Money,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundFailed {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRefunded {
    pub order_id: OrderId,
    pub gateway_refund_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: stock and coupon commitments of the order have been released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationApplied {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderPaid(OrderPaid),
    OrderCancelled(OrderCancelled),
    PreparationStarted(PreparationStarted),
    OrderShipped(OrderShipped),
    OrderCompleted(OrderCompleted),
    RefundRequested(RefundRequested),
    RefundFailed(RefundFailed),
    OrderRefunded(OrderRefunded),
    CompensationApplied(CompensationApplied),
}

impl OrderEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderPlaced(e) => e.order_id,
            OrderEvent::OrderPaid(e) => e.order_id,
            OrderEvent::OrderCancelled(e) => e.order_id,
            OrderEvent::PreparationStarted(e) => e.order_id,
            OrderEvent::OrderShipped(e) => e.order_id,
            OrderEvent::OrderCompleted(e) => e.order_id,
            OrderEvent::RefundRequested(e) => e.order_id,
            OrderEvent::RefundFailed(e) => e.order_id,
            OrderEvent::OrderRefunded(e) => e.order_id,
            OrderEvent::CompensationApplied(e) => e.order_id,
        }
    }
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderPaid(_) => "orders.order.paid",
            OrderEvent::OrderCancelled(_) => "orders.order.cancelled",
            OrderEvent::PreparationStarted(_) => "orders.order.preparation_started",
            OrderEvent::OrderShipped(_) => "orders.order.shipped",
            OrderEvent::OrderCompleted(_) => "orders.order.completed",
            OrderEvent::RefundRequested(_) => "orders.order.refund_requested",
            OrderEvent::RefundFailed(_) => "orders.order.refund_failed",
            OrderEvent::OrderRefunded(_) => "orders.order.refunded",
            OrderEvent::CompensationApplied(_) => "orders.order.compensation_applied",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.placed_at,
            OrderEvent::OrderPaid(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
            OrderEvent::PreparationStarted(e) => e.occurred_at,
            OrderEvent::OrderShipped(e) => e.occurred_at,
            OrderEvent::OrderCompleted(e) => e.occurred_at,
            OrderEvent::RefundRequested(e) => e.occurred_at,
            OrderEvent::RefundFailed(e) => e.occurred_at,
            OrderEvent::OrderRefunded(e) => e.occurred_at,
            OrderEvent::CompensationApplied(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.order_no = Some(e.order_no.clone());
                self.user_id = Some(e.user_id);
                self.lines = e.lines.clone();
                self.delivery = Some(e.delivery.clone());
                self.totals = Some(e.totals);
                self.coupon = e.coupon;
                self.points = Some(e.points);
                self.status = OrderStatus::Unpaid;
                self.placed_at = Some(e.placed_at);
                self.expires_at = Some(e.expires_at);
                self.created = true;
            }
            OrderEvent::OrderPaid(e) => {
                self.status = OrderStatus::Paid;
                self.payment = Some(PaymentRecord {
                    transaction_id: e.transaction_id.clone(),
                    amount: e.amount,
                    paid_at: e.occurred_at,
                });
            }
            OrderEvent::OrderCancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.cancelled_at = Some(e.occurred_at);
                self.cancel_reason = Some(e.reason);
            }
            OrderEvent::PreparationStarted(e) => {
                self.status = OrderStatus::Preparing;
                self.preparing_at = Some(e.occurred_at);
            }
            OrderEvent::OrderShipped(e) => {
                self.status = OrderStatus::Shipped;
                self.shipped_at = Some(e.occurred_at);
                self.tracking_no = Some(e.tracking_no.clone());
            }
            OrderEvent::OrderCompleted(e) => {
                self.status = OrderStatus::Completed;
                self.completed_at = Some(e.occurred_at);
            }
            OrderEvent::RefundRequested(e) => {
                self.status = OrderStatus::Refunding;
                self.refund = Some(RefundRecord {
                    amount: e.amount,
                    reason: e.reason.clone(),
                    requested_at: e.occurred_at,
                    failure: None,
                    gateway_refund_id: None,
                    refunded_at: None,
                });
            }
            OrderEvent::RefundFailed(e) => {
                if let Some(refund) = self.refund.as_mut() {
                    refund.failure = Some(e.reason.clone());
                }
            }
            OrderEvent::OrderRefunded(e) => {
                self.status = OrderStatus::Refunded;
                if let Some(refund) = self.refund.as_mut() {
                    refund.failure = None;
                    refund.gateway_refund_id = Some(e.gateway_refund_id.clone());
                    refund.refunded_at = Some(e.occurred_at);
                }
            }
            OrderEvent::CompensationApplied(e) => {
                self.compensated_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !matches!(command, OrderCommand::PlaceOrder(_)) {
            if !self.created {
                return Err(DomainError::not_found());
            }
            self.ensure_order_id(command.order_id())?;
        }

        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::ConfirmPayment(cmd) => self.handle_confirm_payment(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            OrderCommand::StartPreparing(cmd) => {
                self.expect_status(&[OrderStatus::Paid], OrderStatus::Preparing)?;
                Ok(vec![OrderEvent::PreparationStarted(PreparationStarted {
                    order_id: self.id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            OrderCommand::ShipOrder(cmd) => {
                self.expect_status(&[OrderStatus::Preparing], OrderStatus::Shipped)?;
                if cmd.tracking_no.trim().is_empty() {
                    return Err(DomainError::validation("tracking number cannot be empty"));
                }
                Ok(vec![OrderEvent::OrderShipped(OrderShipped {
                    order_id: self.id,
                    tracking_no: cmd.tracking_no.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            OrderCommand::CompleteOrder(cmd) => {
                self.expect_status(&[OrderStatus::Shipped], OrderStatus::Completed)?;
                Ok(vec![OrderEvent::OrderCompleted(OrderCompleted {
                    order_id: self.id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            OrderCommand::RequestRefund(cmd) => self.handle_request_refund(cmd),
            OrderCommand::RecordRefundFailure(cmd) => {
                self.expect_status(&[OrderStatus::Refunding], OrderStatus::Refunding)?;
                Ok(vec![OrderEvent::RefundFailed(RefundFailed {
                    order_id: self.id,
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            OrderCommand::CompleteRefund(cmd) => {
                self.expect_status(&[OrderStatus::Refunding], OrderStatus::Refunded)?;
                Ok(vec![OrderEvent::OrderRefunded(OrderRefunded {
                    order_id: self.id,
                    gateway_refund_id: cmd.gateway_refund_id.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            OrderCommand::MarkCompensated(cmd) => {
                if !self.needs_compensation() {
                    return Err(DomainError::state_conflict(format!(
                        "order {} has nothing to compensate (status {}, compensated: {})",
                        self.id,
                        self.status,
                        self.compensated_at.is_some()
                    )));
                }
                Ok(vec![OrderEvent::CompensationApplied(CompensationApplied {
                    order_id: self.id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    /// From-state guard shared by every transition.
    fn expect_status(&self, from: &[OrderStatus], to: OrderStatus) -> Result<(), DomainError> {
        if from.contains(&self.status) {
            return Ok(());
        }
        Err(DomainError::state_conflict(format!(
            "order {} cannot move to {to} from {}",
            self.id, self.status
        )))
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;

        if cmd.lines.is_empty() {
            return Err(DomainError::validation("order must contain at least one line"));
        }
        if cmd.lines.iter().any(|l| l.quantity == 0) {
            return Err(DomainError::validation("line quantity must be positive"));
        }
        if cmd.expires_at <= cmd.placed_at {
            return Err(DomainError::validation("payment window must be positive"));
        }
        cmd.totals.check_consistent()?;
        if cmd.coupon.is_none() && !cmd.totals.coupon_amount.is_zero() {
            return Err(DomainError::invariant("coupon amount without a coupon"));
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            order_no: cmd.order_no.clone(),
            user_id: cmd.user_id,
            lines: cmd.lines.clone(),
            delivery: cmd.delivery.clone(),
            totals: cmd.totals,
            coupon: cmd.coupon,
            points: cmd.points,
            placed_at: cmd.placed_at,
            expires_at: cmd.expires_at,
        })])
    }

    fn handle_confirm_payment(&self, cmd: &ConfirmPayment) -> Result<Vec<OrderEvent>, DomainError> {
        self.expect_status(&[OrderStatus::Unpaid], OrderStatus::Paid)?;

        if self.is_expired(cmd.paid_at) {
            return Err(DomainError::expired(format!(
                "payment window of order {} has closed",
                self.id
            )));
        }
        if cmd.transaction_id.trim().is_empty() {
            return Err(DomainError::validation("transaction id cannot be empty"));
        }
        if cmd.paid_amount != self.pay_amount() {
            return Err(DomainError::validation(format!(
                "paid amount {} does not match order amount {}",
                cmd.paid_amount,
                self.pay_amount()
            )));
        }

        Ok(vec![OrderEvent::OrderPaid(OrderPaid {
            order_id: self.id,
            transaction_id: cmd.transaction_id.clone(),
            amount: cmd.paid_amount,
            occurred_at: cmd.paid_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.expect_status(&[OrderStatus::Unpaid], OrderStatus::Cancelled)?;

        if cmd.reason == CancelReason::PaymentWindowExpired && !self.is_expired(cmd.cancelled_at) {
            return Err(DomainError::invariant(format!(
                "order {} has not expired yet",
                self.id
            )));
        }

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            order_id: self.id,
            reason: cmd.reason,
            occurred_at: cmd.cancelled_at,
        })])
    }

    fn handle_request_refund(&self, cmd: &RequestRefund) -> Result<Vec<OrderEvent>, DomainError> {
        self.expect_status(
            &[OrderStatus::Paid, OrderStatus::Preparing],
            OrderStatus::Refunding,
        )?;

        let paid = self.payment.as_ref().map(|p| p.amount).unwrap_or(Money::ZERO);
        if cmd.amount.is_zero() {
            return Err(DomainError::validation("refund amount must be positive"));
        }
        if cmd.amount > paid {
            return Err(DomainError::validation(format!(
                "refund amount {} exceeds amount paid {paid}",
                cmd.amount
            )));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("refund reason cannot be empty"));
        }

        Ok(vec![OrderEvent::RefundRequested(RefundRequested {
            order_id: self.id,
            amount: cmd.amount,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
