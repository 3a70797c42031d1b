//! In-memory backend used when demo mode is on.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::cart::CartBackend;
use super::{Cart, CartItem, Resource};
use crate::errors::{BeCoinError, Result};

#[derive(Debug, Default)]
struct DemoState {
    next_id: u64,
    carts_by_user: HashMap<String, Cart>,
    items_by_cart: HashMap<String, Vec<CartItem>>,
}

impl DemoState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// A cart backend and catalog that live entirely in memory.
#[derive(Debug)]
pub struct DemoBackend {
    catalog: Vec<Resource>,
    state: Mutex<DemoState>,
}

impl Default for DemoBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoBackend {
    pub fn new() -> Self {
        Self {
            catalog: demo_catalog(),
            state: Mutex::new(DemoState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DemoState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn products(&self) -> Vec<Resource> {
        self.catalog.clone()
    }

    pub fn product(&self, product_id: &str) -> Option<&Resource> {
        self.catalog.iter().find(|p| p.id == product_id)
    }

    /// Puts items straight into a user's server cart, creating the cart if needed.
    pub fn seed(&self, user_id: &str, items: Vec<CartItem>) -> Result<String> {
        let cart = self.get_or_create_cart(user_id)?;
        self.lock()
            .items_by_cart
            .entry(cart.id.clone())
            .or_default()
            .extend(items);
        Ok(cart.id)
    }

    fn with_items<T>(&self, cart_id: &str, f: impl FnOnce(&mut Vec<CartItem>) -> Result<T>) -> Result<T> {
        let mut state = self.lock();
        let items = state
            .items_by_cart
            .get_mut(cart_id)
            .ok_or(BeCoinError::NotFound)?;
        f(items)
    }
}

impl CartBackend for DemoBackend {
    fn get_or_create_cart(&self, user_id: &str) -> Result<Cart> {
        let mut state = self.lock();
        if let Some(cart) = state.carts_by_user.get(user_id) {
            return Ok(cart.clone());
        }
        let cart = Cart {
            id: state.next_id("cart"),
            user_id: Some(user_id.to_string()),
        };
        debug!(cart_id = %cart.id, user_id, "demo cart created");
        state.items_by_cart.insert(cart.id.clone(), Vec::new());
        state.carts_by_user.insert(user_id.to_string(), cart.clone());
        Ok(cart)
    }

    fn list_items(&self, cart_id: &str) -> Result<Vec<CartItem>> {
        self.with_items(cart_id, |items| Ok(items.clone()))
    }

    fn add_item(&self, cart_id: &str, item: &CartItem) -> Result<CartItem> {
        let product = self.product(&item.product_id).cloned();
        let stock = product.as_ref().map(|p| p.quantity);
        let id = self.lock().next_id("item");

        self.with_items(cart_id, |items| {
            let held = items
                .iter()
                .find(|i| i.product_id == item.product_id)
                .map_or(0, |i| i.quantity);
            let wanted = held.saturating_add(item.quantity);
            if stock.is_some_and(|stock| wanted > stock) {
                debug!(product_id = %item.product_id, wanted, "not enough demo stock");
                return Err(BeCoinError::Conflict);
            }

            let saved = match items.iter_mut().find(|i| i.product_id == item.product_id) {
                Some(existing) => {
                    existing.quantity = wanted;
                    existing.clone()
                }
                None => {
                    let saved = CartItem {
                        id: Some(id),
                        product,
                        ..item.clone()
                    };
                    items.push(saved.clone());
                    saved
                }
            };
            Ok(saved)
        })
    }

    fn update_item_quantity(&self, cart_id: &str, product_id: &str, quantity: u32) -> Result<()> {
        self.with_items(cart_id, |items| {
            let item = items
                .iter_mut()
                .find(|i| i.product_id == product_id)
                .ok_or(BeCoinError::NotFound)?;
            item.quantity = quantity;
            Ok(())
        })
    }

    fn remove_item(&self, cart_id: &str, product_id: &str) -> Result<()> {
        self.with_items(cart_id, |items| {
            items.retain(|i| i.product_id != product_id);
            Ok(())
        })
    }

    fn clear(&self, cart_id: &str) -> Result<()> {
        self.with_items(cart_id, |items| {
            items.clear();
            Ok(())
        })
    }
}

fn demo_catalog() -> Vec<Resource> {
    let entry = |id: &str, name: &str, price: f64, discount: f64, quantity: u32| Resource {
        id: id.to_string(),
        name: name.to_string(),
        description: None,
        price,
        discount,
        quantity,
        image_url: None,
        category_id: Some("demo".to_string()),
    };
    vec![
        entry("demo-1", "Bolsa de tela reutilizable", 4.5, 0.0, 40),
        entry("demo-2", "Botella térmica", 18.0, 15.0, 12),
        entry("demo-3", "Kit de compostaje", 32.0, 25.0, 5),
        entry("demo-4", "Cupón café orgánico", 3.0, 0.0, 100),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carts_are_created_once_per_user() {
        let demo = DemoBackend::new();
        let first = demo.get_or_create_cart("u1").unwrap();
        let again = demo.get_or_create_cart("u1").unwrap();
        let other = demo.get_or_create_cart("u2").unwrap();
        assert_eq!(first, again);
        assert_ne!(first.id, other.id);
    }

    #[test]
    fn add_item_folds_and_checks_stock() {
        let demo = DemoBackend::new();
        let cart = demo.get_or_create_cart("u1").unwrap();

        let saved = demo.add_item(&cart.id, &CartItem::new("demo-2", 1, 18.0)).unwrap();
        assert!(saved.id.is_some());
        assert_eq!(saved.product.as_ref().unwrap().discount, 15.0);

        demo.add_item(&cart.id, &CartItem::new("demo-2", 2, 18.0)).unwrap();
        let items = demo.list_items(&cart.id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 3);

        assert!(matches!(
            demo.add_item(&cart.id, &CartItem::new("demo-3", 50, 32.0)),
            Err(BeCoinError::Conflict)
        ));
    }

    #[test]
    fn stock_counts_what_is_already_in_the_cart() {
        let demo = DemoBackend::new();
        let cart = demo.get_or_create_cart("u1").unwrap();

        demo.add_item(&cart.id, &CartItem::new("demo-3", 5, 32.0)).unwrap();
        assert!(matches!(
            demo.add_item(&cart.id, &CartItem::new("demo-3", 1, 32.0)),
            Err(BeCoinError::Conflict)
        ));
        assert_eq!(demo.list_items(&cart.id).unwrap()[0].quantity, 5);
    }

    #[test]
    fn unknown_cart_is_not_found() {
        let demo = DemoBackend::new();
        assert!(matches!(demo.list_items("nope"), Err(BeCoinError::NotFound)));
    }
}
