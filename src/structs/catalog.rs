use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::instrument;

use super::client::Client;
use super::{Address, Category, PrizeRedemption, Product, Resource, UserResource};
use crate::errors::Result;

impl Client {
    /// Shop products, optionally restricted to one category.
    #[instrument(skip(self))]
    pub fn products(&self, category_id: Option<&str>) -> Result<Vec<Product>> {
        match category_id {
            Some(category_id) => self.get_list("/products", &[("category_id", category_id)]),
            None => self.get_list("/products", &[]),
        }
    }

    pub fn product(&self, product_id: &str) -> Result<Product> {
        self.get(&format!("/products/{product_id}"), &[])
    }

    pub fn categories(&self) -> Result<Vec<Category>> {
        self.get_list("/category", &[])
    }

    /// Rewards that can be claimed with BeCoins.
    pub fn resources(&self) -> Result<Vec<Resource>> {
        self.get_list("/resources", &[])
    }

    /// Claims `quantity` units of a resource for the signed-in user.
    #[instrument(skip(self))]
    pub fn claim_resource(&self, resource_id: &str, quantity: u32) -> Result<UserResource> {
        self.require_token()?;
        self.post(
            &format!("/resources/{resource_id}/claim"),
            &json!({ "quantity": quantity.max(1) }),
        )
    }

    /// Every claim ticket the user holds, spent or not.
    pub fn user_resources(&self) -> Result<Vec<UserResource>> {
        self.require_token()?;
        self.get_list("/resources/user", &[])
    }

    /// Claim tickets that can still be redeemed at `now`.
    pub fn usable_user_resources(&self, now: DateTime<Utc>) -> Result<Vec<UserResource>> {
        Ok(self
            .user_resources()?
            .into_iter()
            .filter(|ticket| ticket.is_usable(now))
            .collect())
    }

    pub fn prize_redemptions(&self) -> Result<Vec<PrizeRedemption>> {
        self.require_token()?;
        self.get_list("/prize-redemptions/user", &[])
    }

    pub fn addresses(&self) -> Result<Vec<Address>> {
        self.require_token()?;
        self.get_list("/user-address", &[])
    }

    pub fn add_address(&self, address: &Address) -> Result<Address> {
        self.require_token()?;
        self.post("/user-address", address)
    }
}
