use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::balance::{lenient_f64, lenient_u32, AmountScale, BackendAmount};
use crate::pricing::{calculate_resource_price, PriceBreakdown};

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod client;
pub mod demo;
pub mod session;
pub mod socket;
pub mod wallet;

/// Backend ids arrive as numbers from some endpoints and strings from others.
pub(crate) fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

fn lenient_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Ok(None),
    }
}

/// A purchasable catalog entry. Read-only on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// List price in USD.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price: f64,
    /// Discount percentage, 0 to 100.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub discount: f64,
    /// Units in stock.
    #[serde(default, alias = "stock", deserialize_with = "lenient_u32")]
    pub quantity: u32,
    #[serde(default, alias = "image")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub category_id: Option<String>,
}

/// Shop products share the resource shape.
pub type Product = Resource;

impl Resource {
    pub fn price_breakdown(&self) -> PriceBreakdown {
        calculate_resource_price(self.price, self.discount)
    }

    pub fn in_stock(&self) -> bool {
        self.quantity > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    pub name: String,
}

/// A claim ticket binding a resource to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResource {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub resource: Option<Resource>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub quantity: u32,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub quantity_redeemed: u32,
    #[serde(default)]
    pub is_redeemed: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserResource {
    pub fn remaining(&self) -> u32 {
        self.quantity.saturating_sub(self.quantity_redeemed)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// Not redeemed, units left, and not past its expiry.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.is_redeemed && self.quantity_redeemed < self.quantity && !self.is_expired(now)
    }
}

/// One line of the server cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub product_id: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub quantity: u32,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub unit_price: f64,
    #[serde(default)]
    pub product: Option<Resource>,
}

impl CartItem {
    pub fn new(product_id: &str, quantity: u32, unit_price: f64) -> Self {
        Self {
            id: None,
            product_id: product_id.to_string(),
            quantity,
            unit_price,
            product: None,
        }
    }

    /// Line pricing. Uses the embedded product's discount when the backend sent one.
    pub fn price_breakdown(&self) -> PriceBreakdown {
        let discount = self.product.as_ref().map_or(0.0, |p| p.discount);
        calculate_resource_price(self.unit_price, discount).times(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub user_id: Option<String>,
}

/// What a ledger row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Transfer,
    Receive,
    Recharge,
    Exchange,
    Payment,
    Collection,
}

impl TransactionKind {
    /// Exact tag match, as sent by backends that emit the tagged contract.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "transfer" => Some(TransactionKind::Transfer),
            "receive" => Some(TransactionKind::Receive),
            "recharge" => Some(TransactionKind::Recharge),
            "exchange" => Some(TransactionKind::Exchange),
            "payment" => Some(TransactionKind::Payment),
            "collection" => Some(TransactionKind::Collection),
            _ => None,
        }
    }

    /// Classifies a free-form label from older backends. Unknown labels are payments.
    pub fn from_legacy_label(label: &str) -> Self {
        let label = label.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| label.contains(n));

        if has(&["recib", "receiv", "ingreso"]) {
            TransactionKind::Receive
        } else if has(&["transf", "envío", "envio", "enviad"]) {
            TransactionKind::Transfer
        } else if has(&["recarga", "recharge", "top-up", "topup", "deposit"]) {
            TransactionKind::Recharge
        } else if has(&["canje", "exchange", "redeem", "cambio"]) {
            TransactionKind::Exchange
        } else if has(&["recolec", "collect", "recicl", "recycl"]) {
            TransactionKind::Collection
        } else {
            TransactionKind::Payment
        }
    }
}

impl<'de> Deserialize<'de> for TransactionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Null, numeric or otherwise odd types count as a payment rather than failing the row.
        let Value::String(label) = Value::deserialize(deserializer)? else {
            return Ok(TransactionKind::Payment);
        };
        Ok(TransactionKind::from_tag(&label)
            .unwrap_or_else(|| TransactionKind::from_legacy_label(&label)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    #[serde(alias = "COMPLETED", alias = "success")]
    Completed,
    #[serde(alias = "FAILED", alias = "rejected")]
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

/// An immutable ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub wallet_id: Option<String>,
    #[serde(default)]
    pub amount: BackendAmount,
    #[serde(default)]
    pub amount_beicon: Option<BackendAmount>,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: TransactionKind,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: TransactionStatus,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn lenient_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TransactionStatus, D::Error> {
    Ok(serde_json::from_value(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn default_kind() -> TransactionKind {
    TransactionKind::Payment
}

impl Transaction {
    /// BeCoin amount for display. Prefers `amount_beicon` when present.
    pub fn display_amount(&self, scale: AmountScale) -> f64 {
        scale.transaction_amount(self.amount_beicon.as_ref().unwrap_or(&self.amount))
    }

    /// Whether this row adds to the user's balance.
    pub fn is_credit(&self) -> bool {
        matches!(
            self.kind,
            TransactionKind::Receive | TransactionKind::Recharge | TransactionKind::Collection
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub balance: BackendAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentType {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl PaymentType {
    pub fn is_becoins(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| code.eq_ignore_ascii_case("becoins"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub id: Option<String>,
    pub street: String,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    pub bank_name: String,
    pub account_number: String,
    #[serde(default)]
    pub holder_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrizeRedemption {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default)]
    pub prize_name: Option<String>,
    #[serde(default)]
    pub becoins_spent: BackendAmount,
    #[serde(default)]
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use crate::structs::client::ListResponse;

    #[test]
    fn resource_decodes_loose_numbers() {
        let resource: Resource = serde_json::from_value(json!({
            "id": 7,
            "name": "Bolsa reutilizable",
            "price": "12.50",
            "discount": null,
            "stock": 3
        }))
        .unwrap();
        assert_eq!(resource.id, "7");
        assert_eq!(resource.price, 12.5);
        assert_eq!(resource.discount, 0.0);
        assert_eq!(resource.quantity, 3);
        assert!(!resource.price_breakdown().has_discount);
    }

    #[test]
    fn user_resource_usability() {
        let now = Utc::now();
        let mut ticket = UserResource {
            id: "1".to_string(),
            resource_id: Some("r1".to_string()),
            resource: None,
            quantity: 2,
            quantity_redeemed: 1,
            is_redeemed: false,
            expires_at: None,
        };
        assert!(ticket.is_usable(now));
        assert_eq!(ticket.remaining(), 1);

        ticket.expires_at = Some(now - Duration::minutes(1));
        assert!(!ticket.is_usable(now));

        ticket.expires_at = Some(now + Duration::days(1));
        ticket.quantity_redeemed = 2;
        assert!(!ticket.is_usable(now));

        ticket.quantity_redeemed = 0;
        ticket.is_redeemed = true;
        assert!(!ticket.is_usable(now));
    }

    #[test]
    fn transaction_kind_prefers_tags() {
        assert_eq!(TransactionKind::from_tag("RECHARGE"), Some(TransactionKind::Recharge));
        assert_eq!(TransactionKind::from_tag("Recarga de saldo"), None);
    }

    #[test]
    fn transaction_kind_classifies_legacy_labels() {
        assert_eq!(
            TransactionKind::from_legacy_label("Recarga de saldo"),
            TransactionKind::Recharge
        );
        assert_eq!(
            TransactionKind::from_legacy_label("Transferencia recibida"),
            TransactionKind::Receive
        );
        assert_eq!(
            TransactionKind::from_legacy_label("Transferencia a Ana"),
            TransactionKind::Transfer
        );
        assert_eq!(
            TransactionKind::from_legacy_label("Recolección de reciclables"),
            TransactionKind::Collection
        );
        assert_eq!(
            TransactionKind::from_legacy_label("Compra en tienda"),
            TransactionKind::Payment
        );
    }

    #[test]
    fn odd_transaction_rows_do_not_sink_the_history() {
        let rows: ListResponse<Transaction> = serde_json::from_value(json!([
            { "id": 1, "amount": 5, "type": "RECHARGE", "created_at": "2026-01-02T10:00:00Z" },
            { "id": 2, "amount": 5, "type": null, "status": null, "created_at": "2026-01-03T10:00:00Z" },
            { "id": 3, "amount": 5, "type": 7, "status": 3, "created_at": "2026-01-04T10:00:00Z" }
        ]))
        .unwrap();
        let rows = rows.into_vec();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].kind, TransactionKind::Recharge);
        assert_eq!(rows[1].kind, TransactionKind::Payment);
        assert_eq!(rows[1].status, TransactionStatus::Unknown);
        assert_eq!(rows[2].kind, TransactionKind::Payment);
    }

    #[test]
    fn transaction_decodes_and_normalizes() {
        let tx: Transaction = serde_json::from_value(json!({
            "id": 10,
            "wallet_id": 3,
            "amount": 150000,
            "amount_beicon": "12.5",
            "type": "Canje de cupón",
            "status": "completed",
            "created_at": "2026-01-02T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(tx.kind, TransactionKind::Exchange);
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.display_amount(AmountScale::LegacyHeuristic), 12.5);
        assert!(!tx.is_credit());

        let tx: Transaction = serde_json::from_value(json!({
            "id": "t2",
            "amount": 150000,
            "type": "recharge",
            "status": "weird",
            "created_at": "2026-01-02T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(tx.display_amount(AmountScale::LegacyHeuristic), 1500.0);
        assert_eq!(tx.status, TransactionStatus::Unknown);
        assert!(tx.is_credit());
    }

    #[test]
    fn cart_item_line_total_uses_product_discount() {
        let mut item = CartItem::new("p1", 2, 10.0);
        assert_eq!(item.price_breakdown().final_price, 20.0);

        item.product = Some(Resource {
            id: "p1".to_string(),
            name: "Botella".to_string(),
            description: None,
            price: 10.0,
            discount: 50.0,
            quantity: 5,
            image_url: None,
            category_id: None,
        });
        assert_eq!(item.price_breakdown().final_price, 10.0);
        assert_eq!(item.price_breakdown().savings, 10.0);
    }
}
