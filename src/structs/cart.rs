use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::Client;
use super::demo::DemoBackend;
use super::{Cart, CartItem};
use crate::errors::{BeCoinError, Result};
use crate::pricing::usd_to_becoins;

/// Server side of the cart. The REST client implements it; so does the demo backend.
pub trait CartBackend: Send + Sync {
    /// Returns the user's cart, creating an empty one if they have none.
    fn get_or_create_cart(&self, user_id: &str) -> Result<Cart>;
    fn list_items(&self, cart_id: &str) -> Result<Vec<CartItem>>;
    fn add_item(&self, cart_id: &str, item: &CartItem) -> Result<CartItem>;
    fn update_item_quantity(&self, cart_id: &str, product_id: &str, quantity: u32) -> Result<()>;
    fn remove_item(&self, cart_id: &str, product_id: &str) -> Result<()>;
    fn clear(&self, cart_id: &str) -> Result<()>;
}

impl Client {
    /// The cart backend for this client's mode: the REST API, or the in-memory demo.
    pub fn cart_backend(self: &Arc<Self>) -> Arc<dyn CartBackend> {
        if self.config.demo_mode {
            debug!("demo mode, using in-memory cart");
            Arc::new(DemoBackend::new())
        } else {
            Arc::clone(self) as Arc<dyn CartBackend>
        }
    }
}

impl CartBackend for Client {
    #[instrument(skip(self))]
    fn get_or_create_cart(&self, user_id: &str) -> Result<Cart> {
        match self.get::<Cart>(&format!("/carts/user/{user_id}"), &[]) {
            Ok(cart) => Ok(cart),
            Err(BeCoinError::NotFound) => {
                debug!("no cart yet, creating one");
                self.post("/carts", &json!({ "user_id": user_id }))
            }
            Err(e) => Err(e),
        }
    }

    fn list_items(&self, cart_id: &str) -> Result<Vec<CartItem>> {
        self.get_list(&format!("/cart-items/cart/{cart_id}"), &[])
    }

    fn add_item(&self, cart_id: &str, item: &CartItem) -> Result<CartItem> {
        self.post(
            "/cart-items",
            &json!({
                "cart_id": cart_id,
                "product_id": item.product_id,
                "quantity": item.quantity,
                "unit_price": item.unit_price,
            }),
        )
    }

    fn update_item_quantity(&self, cart_id: &str, product_id: &str, quantity: u32) -> Result<()> {
        self.patch::<serde_json::Value, _>(
            &format!("/cart-items/cart/{cart_id}/product/{product_id}"),
            &json!({ "quantity": quantity }),
        )
        .map(|_| ())
    }

    fn remove_item(&self, cart_id: &str, product_id: &str) -> Result<()> {
        self.delete(&format!("/cart-items/cart/{cart_id}/product/{product_id}"))
    }

    fn clear(&self, cart_id: &str) -> Result<()> {
        self.delete(&format!("/cart-items/cart/{cart_id}"))
    }
}

/// The client-held mirror of the server cart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CartState {
    pub cart_id: Option<String>,
    pub items: Vec<CartItem>,
    /// Latest BeCoins balance, pushed by the realtime notifier.
    pub becoins_balance: Option<f64>,
}

/// Cart totals in USD, plus the BeCoins the total costs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CartTotals {
    pub item_count: u32,
    pub subtotal: f64,
    pub savings: f64,
    pub total: f64,
    pub total_becoins: f64,
}

/// Shared cart store read by checkout code. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct CartStore {
    inner: Arc<Mutex<CartState>>,
}

impl CartStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CartState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> CartState {
        self.lock().clone()
    }

    pub fn cart_id(&self) -> Option<String> {
        self.lock().cart_id.clone()
    }

    pub fn items(&self) -> Vec<CartItem> {
        self.lock().items.clone()
    }

    pub fn becoins_balance(&self) -> Option<f64> {
        self.lock().becoins_balance
    }

    pub fn set_becoins_balance(&self, balance: f64) {
        self.lock().becoins_balance = Some(balance);
    }

    /// Server items overwrite local ones.
    pub fn replace(&self, cart_id: &str, items: Vec<CartItem>) {
        let mut state = self.lock();
        state.cart_id = Some(cart_id.to_string());
        state.items = items;
    }

    /// Appends server items whose product is not already in the local cart.
    /// Local lines win for products present on both sides. Returns how many were added.
    pub fn merge(&self, cart_id: &str, items: Vec<CartItem>) -> usize {
        let mut state = self.lock();
        state.cart_id = Some(cart_id.to_string());

        let mut present: HashSet<String> =
            state.items.iter().map(|i| i.product_id.clone()).collect();
        let before = state.items.len();
        for item in items {
            if present.insert(item.product_id.clone()) {
                state.items.push(item);
            }
        }
        state.items.len() - before
    }

    /// Adds units of a product, folding into an existing line when there is one.
    pub fn upsert_item(&self, item: CartItem) {
        let mut state = self.lock();
        match state.items.iter_mut().find(|i| i.product_id == item.product_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(item.quantity);
                existing.unit_price = item.unit_price;
                if existing.id.is_none() {
                    existing.id = item.id;
                }
                if item.product.is_some() {
                    existing.product = item.product;
                }
            }
            None => state.items.push(item),
        }
    }

    pub fn set_quantity(&self, product_id: &str, quantity: u32) {
        let mut state = self.lock();
        if quantity == 0 {
            state.items.retain(|i| i.product_id != product_id);
        } else if let Some(item) = state.items.iter_mut().find(|i| i.product_id == product_id) {
            item.quantity = quantity;
        }
    }

    pub fn remove_item(&self, product_id: &str) {
        self.lock().items.retain(|i| i.product_id != product_id);
    }

    pub fn clear_items(&self) {
        self.lock().items.clear();
    }

    /// Forgets the cart entirely, as on logout.
    pub fn reset(&self) {
        *self.lock() = CartState::default();
    }

    pub fn totals(&self, becoins_per_usd: f64) -> CartTotals {
        let state = self.lock();
        let mut totals = CartTotals::default();
        for item in &state.items {
            let line = item.price_breakdown();
            totals.item_count = totals.item_count.saturating_add(item.quantity);
            totals.subtotal += line.original_price;
            totals.savings += line.savings;
            totals.total += line.final_price;
        }
        totals.total_becoins = usd_to_becoins(totals.total, becoins_per_usd);
        totals
    }
}

/// How server items are reconciled into the local cart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Server items overwrite local state.
    Replace,
    /// Server items missing locally are added; local lines are kept.
    #[default]
    Merge,
}

/// Where a cart session is in its load cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    Uninitialized,
    FetchingServerCart,
    Merged,
    Replaced,
    Ready,
}

/// Result of a completed sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub cart_id: String,
    /// `Merged` or `Replaced`.
    pub applied: SyncState,
    /// Items taken from the server.
    pub server_items_applied: usize,
}

/// Loads the user's server cart into a [`CartStore`] and keeps it in step
/// with cart edits.
///
/// Every operation belongs to the sync's cancellation scope. Once the scope is
/// cancelled, late responses are dropped instead of written to the store.
pub struct CartSync {
    backend: Arc<dyn CartBackend>,
    store: CartStore,
    scope: CancellationToken,
    state: SyncState,
    last_error: Option<String>,
}

impl CartSync {
    pub fn new(backend: Arc<dyn CartBackend>, store: CartStore, scope: CancellationToken) -> Self {
        Self {
            backend,
            store,
            scope,
            state: SyncState::Uninitialized,
            last_error: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn store(&self) -> &CartStore {
        &self.store
    }

    /// The last failure, as a message for the user.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Cancels the scope. Nothing in flight will touch the store afterwards.
    pub fn cancel(&self) {
        self.scope.cancel();
    }

    /// Fetches (or creates) the server cart and applies it with `strategy`.
    ///
    /// Without a signed-in user this is a no-op that stays `Uninitialized`.
    /// On failure the store and the previous state are left as they were.
    #[instrument(skip(self, user_id), fields(user_id = user_id.unwrap_or("-")))]
    pub fn sync(&mut self, user_id: Option<&str>, strategy: SyncStrategy) -> Result<Option<SyncOutcome>> {
        let Some(user_id) = user_id else {
            debug!("no user, cart stays uninitialized");
            return Ok(None);
        };

        if let Err(e) = self.ensure_active() {
            return Err(self.record(e));
        }

        let previous = self.state;
        self.state = SyncState::FetchingServerCart;

        let fetched = self.backend.get_or_create_cart(user_id).and_then(|cart| {
            self.ensure_active()?;
            let items = self.backend.list_items(&cart.id)?;
            self.ensure_active()?;
            Ok((cart, items))
        });

        let (cart, items) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                self.state = previous;
                return Err(self.record(e));
            }
        };

        let (applied, server_items_applied) = match strategy {
            SyncStrategy::Replace => {
                let count = items.len();
                self.store.replace(&cart.id, items);
                (SyncState::Replaced, count)
            }
            SyncStrategy::Merge => (SyncState::Merged, self.store.merge(&cart.id, items)),
        };
        self.state = applied;
        debug!(state = ?applied, server_items_applied, "cart reconciled");
        self.state = SyncState::Ready;
        self.last_error = None;

        info!(cart_id = %cart.id, "cart ready");
        Ok(Some(SyncOutcome {
            cart_id: cart.id,
            applied,
            server_items_applied,
        }))
    }

    /// Adds a product to the server cart, then to the store.
    pub fn add_item(&mut self, product_id: &str, quantity: u32, unit_price: f64) -> Result<()> {
        let cart_id = self.require_cart()?;
        let item = CartItem::new(product_id, quantity, unit_price);
        let saved = self.run(|backend| backend.add_item(&cart_id, &item))?;
        self.store.upsert_item(CartItem {
            quantity,
            ..saved
        });
        Ok(())
    }

    /// Sets a line's quantity. Zero removes the line.
    pub fn update_quantity(&mut self, product_id: &str, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return self.remove_item(product_id);
        }
        let cart_id = self.require_cart()?;
        self.run(|backend| backend.update_item_quantity(&cart_id, product_id, quantity))?;
        self.store.set_quantity(product_id, quantity);
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: &str) -> Result<()> {
        let cart_id = self.require_cart()?;
        self.run(|backend| backend.remove_item(&cart_id, product_id))?;
        self.store.remove_item(product_id);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        let cart_id = self.require_cart()?;
        self.run(|backend| backend.clear(&cart_id))?;
        self.store.clear_items();
        Ok(())
    }

    fn require_cart(&mut self) -> Result<String> {
        match self.store.cart_id() {
            Some(cart_id) => Ok(cart_id),
            None => Err(self.record(BeCoinError::NotFound)),
        }
    }

    /// Runs one backend call inside the scope and records its failure.
    fn run<T>(&mut self, call: impl FnOnce(&dyn CartBackend) -> Result<T>) -> Result<T> {
        let result = self
            .ensure_active()
            .and_then(|_| call(self.backend.as_ref()))
            .and_then(|value| self.ensure_active().map(|_| value));
        match result {
            Ok(value) => {
                self.last_error = None;
                Ok(value)
            }
            Err(e) => Err(self.record(e)),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.scope.is_cancelled() {
            Err(BeCoinError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn record(&mut self, error: BeCoinError) -> BeCoinError {
        if matches!(error, BeCoinError::Cancelled) {
            debug!("scope cancelled, result dropped");
        } else {
            warn!(error = %error, "cart operation failed");
            self.last_error = Some(error.user_message().to_string());
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::structs::client::ClientOptions;
    use crate::structs::session::MemoryStore;

    #[test]
    fn demo_mode_never_reaches_the_network() {
        let mut config = Config::new("http://127.0.0.1:9");
        config.demo_mode = true;
        let client = Arc::new(
            Client::new(ClientOptions {
                config,
                session: Arc::new(MemoryStore::new()),
                debug: false,
            })
            .unwrap(),
        );

        let mut sync = CartSync::new(client.cart_backend(), CartStore::new(), CancellationToken::new());
        let outcome = sync.sync(Some("u1"), SyncStrategy::Merge).unwrap().unwrap();
        assert!(outcome.cart_id.starts_with("cart-"));
        sync.add_item("demo-1", 1, 4.5).unwrap();
        assert_eq!(sync.store().items().len(), 1);
    }

    fn store_with(items: &[(&str, u32)]) -> CartStore {
        let store = CartStore::new();
        for (product, qty) in items {
            store.upsert_item(CartItem::new(product, *qty, 10.0));
        }
        store
    }

    #[test]
    fn merge_adds_only_missing_products() {
        let store = store_with(&[("A", 1), ("B", 5)]);
        let added = store.merge(
            "c1",
            vec![CartItem::new("B", 2, 10.0), CartItem::new("C", 3, 10.0)],
        );
        assert_eq!(added, 1);

        let items = store.items();
        assert_eq!(items.len(), 3);
        assert_eq!(items.iter().find(|i| i.product_id == "B").unwrap().quantity, 5);
        assert_eq!(store.cart_id().as_deref(), Some("c1"));
    }

    #[test]
    fn replace_overwrites_local_items() {
        let store = store_with(&[("A", 1)]);
        store.replace("c1", vec![CartItem::new("B", 2, 10.0)]);
        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id, "B");
    }

    #[test]
    fn upsert_folds_quantities() {
        let store = store_with(&[("A", 1)]);
        store.upsert_item(CartItem::new("A", 2, 12.0));
        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 3);
        assert_eq!(items[0].unit_price, 12.0);
    }

    #[test]
    fn set_quantity_zero_removes() {
        let store = store_with(&[("A", 1), ("B", 1)]);
        store.set_quantity("A", 0);
        assert_eq!(store.items().len(), 1);
        store.set_quantity("B", 4);
        assert_eq!(store.items()[0].quantity, 4);
    }

    #[test]
    fn totals_include_discounts_and_becoins() {
        let store = store_with(&[("A", 2)]);
        store.upsert_item(CartItem::new("B", 1, 5.0));
        let totals = store.totals(2.0);
        assert_eq!(totals.item_count, 3);
        assert_eq!(totals.subtotal, 25.0);
        assert_eq!(totals.total, 25.0);
        assert_eq!(totals.total_becoins, 50.0);
    }

    #[test]
    fn sync_without_user_stays_uninitialized() {
        let backend = Arc::new(DemoBackend::new());
        let mut sync = CartSync::new(backend, CartStore::new(), CancellationToken::new());
        assert_eq!(sync.sync(None, SyncStrategy::Merge).unwrap(), None);
        assert_eq!(sync.state(), SyncState::Uninitialized);
    }

    #[test]
    fn cancelled_scope_never_touches_store() {
        let backend = Arc::new(DemoBackend::new());
        let store = store_with(&[("A", 1)]);
        let mut sync = CartSync::new(backend, store.clone(), CancellationToken::new());
        sync.cancel();

        let err = sync.sync(Some("u1"), SyncStrategy::Replace).unwrap_err();
        assert!(matches!(err, BeCoinError::Cancelled));
        assert_eq!(store.items().len(), 1);
        assert!(store.cart_id().is_none());
        assert_eq!(sync.state(), SyncState::Uninitialized);
        assert!(sync.last_error().is_none());
    }

    #[test]
    fn cancelled_sync_creates_no_server_cart() {
        let backend = Arc::new(DemoBackend::new());
        let mut sync = CartSync::new(backend.clone(), CartStore::new(), CancellationToken::new());
        sync.cancel();
        assert!(matches!(
            sync.sync(Some("u1"), SyncStrategy::Merge),
            Err(BeCoinError::Cancelled)
        ));

        // The first cart the backend hands out is still cart-1.
        assert_eq!(backend.get_or_create_cart("u2").unwrap().id, "cart-1");
    }

    #[test]
    fn huge_quantities_saturate() {
        let store = CartStore::new();
        store.replace(
            "c1",
            vec![CartItem::new("A", u32::MAX, 0.0), CartItem::new("B", 2, 0.0)],
        );
        assert_eq!(store.totals(1.0).item_count, u32::MAX);

        store.upsert_item(CartItem::new("A", 5, 0.0));
        assert_eq!(store.items()[0].quantity, u32::MAX);
    }

    #[test]
    fn edits_need_a_loaded_cart() {
        let backend = Arc::new(DemoBackend::new());
        let mut sync = CartSync::new(backend, CartStore::new(), CancellationToken::new());
        assert!(matches!(sync.add_item("A", 1, 1.0), Err(BeCoinError::NotFound)));
        assert!(sync.last_error().is_some());
    }
}
