//! Domain model: carts, orders, addresses, collaborator record shapes

pub mod address;
pub mod cart;
pub mod money;
pub mod order;
pub mod product;

pub use address::Address;
pub use cart::{Cart, CartItem};
pub use order::{Order, OrderItem, OrderStatus, PaymentMethod, Transaction, TransactionStatus};
pub use product::Product;
