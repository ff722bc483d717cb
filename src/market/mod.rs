pub mod algolia;
pub mod de;
pub mod http;
pub mod models;
pub mod pricing;
pub mod scanner;
pub mod variants;
