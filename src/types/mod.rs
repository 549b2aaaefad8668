pub mod asset;
pub mod conversions;
pub mod order;

pub use asset::{Asset, AssetClass, ClassTag};
pub use order::{
    AuctionType, Order, OrderKind, OrderPatch, OrderSignature, OrderStatus, OrderStruct,
    OrderSubmission, Swap,
};
