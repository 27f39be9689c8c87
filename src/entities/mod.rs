pub mod commerce;
pub mod order;
pub mod product;
pub mod user;

pub use commerce::{Address, Cart, CartItem, Category};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use product::{Entity as Product, Model as ProductModel};
pub use user::{Entity as User, Model as UserModel, UserRole};
