use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use super::client::Client;
use super::session::WALLET_ID_KEY;
use super::{BankAccount, PaymentType, Transaction, Wallet};
use crate::errors::{BeCoinError, Result};
use crate::pricing::can_afford;

/// What the backend answers to a checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutResult {
    #[serde(default)]
    pub status: Option<String>,
    /// Ledger row for payments that settled immediately (BeCoins).
    #[serde(default)]
    pub transaction: Option<Transaction>,
    /// Hosted payment page for external payment rails.
    #[serde(default, alias = "checkoutUrl", alias = "payment_url")]
    pub checkout_url: Option<String>,
}

impl CheckoutResult {
    /// Whether the user still has to finish paying in the browser.
    pub fn needs_browser(&self) -> bool {
        self.transaction.is_none() && self.checkout_url.is_some()
    }
}

impl Client {
    /// The signed-in user's wallet. Remembers its id in the session.
    #[instrument(skip(self))]
    pub fn wallet(&self) -> Result<Wallet> {
        let user = self.require_user()?;
        let wallet: Wallet = self.get(&format!("/wallets/user/{}", user.id), &[])?;
        self.session().set(WALLET_ID_KEY, &wallet.id)?;
        Ok(wallet)
    }

    /// The stored wallet id, fetching the wallet when none is stored yet.
    pub fn wallet_id(&self) -> Result<String> {
        match self.session().get(WALLET_ID_KEY)? {
            Some(id) => Ok(id),
            None => self.wallet().map(|w| w.id),
        }
    }

    /// The BeCoins balance, normalized for display.
    pub fn balance(&self) -> Result<f64> {
        let wallet = self.wallet()?;
        Ok(self.amount_scale().balance(&wallet.balance))
    }

    /// Wallet history, newest first.
    pub fn transactions(&self) -> Result<Vec<Transaction>> {
        let wallet_id = self.wallet_id()?;
        let mut transactions: Vec<Transaction> =
            self.get_list(&format!("/transactions/wallet/{wallet_id}"), &[])?;
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions)
    }

    pub fn payment_types(&self) -> Result<Vec<PaymentType>> {
        self.get_list("/payment-types", &[])
    }

    pub fn bank_accounts(&self) -> Result<Vec<BankAccount>> {
        self.require_token()?;
        self.get_list("/bank_account", &[])
    }

    /// Pays for a cart.
    ///
    /// BeCoins payments are checked against `balance` first and settle
    /// immediately. Other payment types come back with a `checkout_url`.
    #[instrument(skip(self, payment_type), fields(payment_type = %payment_type.name))]
    pub fn checkout(
        &self,
        cart_id: &str,
        payment_type: &PaymentType,
        total_becoins: f64,
        balance: Option<f64>,
    ) -> Result<CheckoutResult> {
        self.require_token()?;
        if payment_type.is_becoins() {
            if let Some(balance) = balance {
                if !can_afford(balance, total_becoins) {
                    debug!(balance, total_becoins, "balance too low");
                    return Err(BeCoinError::Conflict);
                }
            }
        }

        let result: CheckoutResult = self.post(
            &format!("/carts/{cart_id}/checkout"),
            &json!({ "payment_type_id": payment_type.id }),
        )?;
        info!(needs_browser = result.needs_browser(), "checkout submitted");
        Ok(result)
    }

    /// Opens an external payment page in the user's default browser.
    pub fn open_checkout(&self, result: &CheckoutResult) -> Result<()> {
        let raw = result.checkout_url.as_deref().ok_or(BeCoinError::FailedToDecode)?;
        let url = Url::parse(raw).map_err(|_| BeCoinError::InvalidBaseUrl(raw.to_string()))?;
        if url.scheme() != "https" {
            return Err(BeCoinError::InvalidBaseUrl(raw.to_string()));
        }
        open::that(url.as_str()).map_err(|_| BeCoinError::BrowserLaunch)
    }
}
