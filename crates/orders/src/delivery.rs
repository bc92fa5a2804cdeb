use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Express,
    Pickup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub recipient: String,
    pub phone: String,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupSlot {
    pub store_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Delivery input as submitted with a cart (fields may be inconsistent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub method: DeliveryMethod,
    pub address: Option<Address>,
    pub pickup: Option<PickupSlot>,
}

/// Validated delivery choice stored on the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Delivery {
    Express { address: Address },
    Pickup { slot: PickupSlot },
}

impl Delivery {
    pub fn method(&self) -> DeliveryMethod {
        match self {
            Delivery::Express { .. } => DeliveryMethod::Express,
            Delivery::Pickup { .. } => DeliveryMethod::Pickup,
        }
    }

    /// Check that the request carries exactly the fields its method needs.
    pub fn from_request(request: DeliveryRequest, now: DateTime<Utc>) -> DomainResult<Self> {
        match request.method {
            DeliveryMethod::Express => {
                if request.pickup.is_some() {
                    return Err(DomainError::validation(
                        "express delivery cannot carry a pickup slot",
                    ));
                }
                let address = request
                    .address
                    .ok_or_else(|| DomainError::validation("express delivery requires an address"))?;
                for (field, value) in [
                    ("recipient", &address.recipient),
                    ("phone", &address.phone),
                    ("line", &address.line),
                ] {
                    if value.trim().is_empty() {
                        return Err(DomainError::validation(format!(
                            "address {field} cannot be empty"
                        )));
                    }
                }
                Ok(Delivery::Express { address })
            }
            DeliveryMethod::Pickup => {
                if request.address.is_some() {
                    return Err(DomainError::validation(
                        "pickup orders cannot carry a delivery address",
                    ));
                }
                let slot = request
                    .pickup
                    .ok_or_else(|| DomainError::validation("pickup requires a pickup slot"))?;
                if slot.store_id.trim().is_empty() {
                    return Err(DomainError::validation("pickup store cannot be empty"));
                }
                if slot.window_end <= slot.window_start {
                    return Err(DomainError::validation("pickup window is empty"));
                }
                if slot.window_end <= now {
                    return Err(DomainError::validation("pickup window has already passed"));
                }
                Ok(Delivery::Pickup { slot })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn address() -> Address {
        Address {
            recipient: "Ada".to_string(),
            phone: "555-0100".to_string(),
            line: "1 Analytical Way".to_string(),
        }
    }

    fn slot(now: DateTime<Utc>) -> PickupSlot {
        PickupSlot {
            store_id: "store-7".to_string(),
            window_start: now + Duration::hours(1),
            window_end: now + Duration::hours(2),
        }
    }

    #[test]
    fn express_requires_complete_address() {
        let now = Utc::now();
        let ok = DeliveryRequest {
            method: DeliveryMethod::Express,
            address: Some(address()),
            pickup: None,
        };
        assert_eq!(Delivery::from_request(ok, now).unwrap().method(), DeliveryMethod::Express);

        let mut blank = address();
        blank.phone = "  ".to_string();
        let bad = DeliveryRequest {
            method: DeliveryMethod::Express,
            address: Some(blank),
            pickup: None,
        };
        assert!(Delivery::from_request(bad, now).is_err());
    }

    #[test]
    fn mixed_fields_are_rejected() {
        let now = Utc::now();
        let mixed = DeliveryRequest {
            method: DeliveryMethod::Pickup,
            address: Some(address()),
            pickup: Some(slot(now)),
        };
        assert!(matches!(
            Delivery::from_request(mixed, now),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn past_pickup_window_is_rejected() {
        let now = Utc::now();
        let req = DeliveryRequest {
            method: DeliveryMethod::Pickup,
            address: None,
            pickup: Some(slot(now - Duration::hours(3))),
        };
        assert!(Delivery::from_request(req, now).is_err());
    }
}
