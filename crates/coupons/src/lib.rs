//! Coupon domain module: issuance rules and the claimed-instance lifecycle.
//!
//! The atomic claim itself (counter increment + instance creation as one unit)
//! is a store primitive; this crate decides whether a claim or a redemption is
//! allowed and what a release does to a claimed instance.

pub mod coupon;
pub mod user_coupon;

pub use coupon::{Coupon, CouponDiscount, CouponRejection};
pub use user_coupon::{CouponReleasePolicy, UserCoupon, UserCouponStatus};
