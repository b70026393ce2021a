use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::domain::{Delivery, Item, Order, Payment};

pub const PHONE_PATTERN: &str = r"^\+?[0-9]{10,15}$";
pub const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Every rule an order violated, in the order the rules were checked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    fn push(&mut self, result: ValidationResult) {
        if let Err(e) = result {
            self.0.push(e);
        }
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed: ")?;
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn validate_required(field: &str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_positive(field: &str, value: i64) -> ValidationResult {
    if value <= 0 {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_non_negative(field: &str, value: i64) -> ValidationResult {
    if value < 0 {
        return Err(ValidationError::new(field, "must not be negative"));
    }

    Ok(())
}

pub fn is_valid_phone(phone: &str) -> bool {
    static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
    PHONE_REGEX
        .get_or_init(|| Regex::new(PHONE_PATTERN).expect("phone pattern compiles"))
        .is_match(phone)
}

pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    EMAIL_REGEX
        .get_or_init(|| Regex::new(EMAIL_PATTERN).expect("email pattern compiles"))
        .is_match(email)
}

/// Checks an order against the structural and business rules, using the
/// current time as the reference for `date_created`.
pub fn validate_order(order: &Order) -> Result<(), ValidationErrors> {
    validate_order_at(order, Utc::now())
}

/// Same as [`validate_order`] with an explicit processing time.
pub fn validate_order_at(order: &Order, now: DateTime<Utc>) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    errors.push(validate_required("order_uid", &order.order_uid));
    errors.push(validate_required("track_number", &order.track_number));
    errors.push(validate_required("entry", &order.entry));

    validate_delivery(&order.delivery, &mut errors);
    validate_payment(&order.payment, &mut errors);
    validate_items(&order.items, &mut errors);

    match order.date_created {
        None => errors.push(Err(ValidationError::new("date_created", "must be set"))),
        Some(created) if created > now => errors.push(Err(ValidationError::new(
            "date_created",
            "must not be in the future",
        ))),
        Some(_) => {}
    }

    errors.push(validate_non_negative("sm_id", order.sm_id.into()));

    errors.into_result()
}

fn validate_delivery(delivery: &Delivery, errors: &mut ValidationErrors) {
    errors.push(validate_required("delivery.name", &delivery.name));

    if delivery.phone.trim().is_empty() {
        errors.push(validate_required("delivery.phone", &delivery.phone));
    } else if !is_valid_phone(&delivery.phone) {
        errors.push(Err(ValidationError::new(
            "delivery.phone",
            "must contain 10 to 15 digits with an optional leading '+'",
        )));
    }

    if !delivery.email.is_empty() && !is_valid_email(&delivery.email) {
        errors.push(Err(ValidationError::new(
            "delivery.email",
            "must be a valid email address",
        )));
    }

    errors.push(validate_required("delivery.address", &delivery.address));
    errors.push(validate_required("delivery.city", &delivery.city));
}

fn validate_payment(payment: &Payment, errors: &mut ValidationErrors) {
    errors.push(validate_required("payment.transaction", &payment.transaction));
    errors.push(validate_required("payment.currency", &payment.currency));
    errors.push(validate_required("payment.provider", &payment.provider));
    errors.push(validate_positive("payment.amount", payment.amount));
    errors.push(validate_non_negative(
        "payment.delivery_cost",
        payment.delivery_cost,
    ));
    errors.push(validate_non_negative("payment.goods_total", payment.goods_total));
    errors.push(validate_non_negative("payment.custom_fee", payment.custom_fee));
}

fn validate_items(items: &[Item], errors: &mut ValidationErrors) {
    if items.is_empty() {
        errors.push(Err(ValidationError::new(
            "items",
            "at least one item is required",
        )));
        return;
    }

    for (i, item) in items.iter().enumerate() {
        let field = |name: &str| format!("items[{}].{}", i, name);

        errors.push(validate_positive(&field("chrt_id"), item.chrt_id));
        errors.push(validate_positive(&field("price"), item.price));
        errors.push(validate_positive(&field("total_price"), item.total_price));
        errors.push(validate_positive(&field("nm_id"), item.nm_id));
        errors.push(validate_positive(&field("status"), item.status.into()));
        errors.push(validate_non_negative(&field("sale"), item.sale.into()));
        errors.push(validate_required(&field("name"), &item.name));
        errors.push(validate_required(&field("brand"), &item.brand));
        errors.push(validate_required(&field("rid"), &item.rid));
        errors.push(validate_required(&field("track_number"), &item.track_number));
    }
}
