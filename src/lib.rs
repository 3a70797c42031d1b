//! Rust SDK for the BeCoins recycling-rewards API.
//!
//! Create one [`Client`] at startup and pass it by reference. Catalog, wallet
//! and auth calls live on the client; cart reconciliation lives in
//! [`CartSync`], which works against any [`CartBackend`] (the client itself,
//! or [`DemoBackend`] in demo mode). [`BalanceNotifier`] receives realtime
//! wallet events.

pub mod balance;
pub mod config;
pub mod errors;
pub mod pricing;
mod structs;

pub use balance::{convert_backend_balance, convert_transaction_amount, AmountScale, BackendAmount};
pub use config::{Auth0Config, Config};
pub use errors::{BeCoinError, Result};
pub use pricing::{calculate_purchase_total, calculate_resource_price, PriceBreakdown};
pub use structs::auth::{token_expiry, AuthUser, RegisterParams, UserRole};
pub use structs::cart::{
    CartBackend, CartState, CartStore, CartSync, CartTotals, SyncOutcome, SyncState, SyncStrategy,
};
pub use structs::client::{init_logging, Client, ClientOptions, ListResponse};
pub use structs::demo::DemoBackend;
pub use structs::session::{
    FileStore, MemoryStore, SessionStore, AUTH_TOKEN_KEY, AUTH_USER_KEY, WALLET_ID_KEY,
};
pub use structs::socket::{
    socket_url, BalanceNotifier, BalanceUpdate, PaymentSuccess, BALANCE_UPDATED, PAYMENT_SUCCESS,
    TRANSACTION_RECEIVED,
};
pub use structs::wallet::CheckoutResult;
pub use structs::{
    Address, BankAccount, Cart, CartItem, Category, PaymentType, PrizeRedemption, Product,
    Resource, Transaction, TransactionKind, TransactionStatus, UserResource, Wallet,
};

pub use tokio_util::sync::CancellationToken;
