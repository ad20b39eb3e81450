pub mod mini;

pub use mini::MiniExpressionEngine;
