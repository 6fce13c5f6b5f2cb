pub mod accounts;
pub mod authentication;
pub mod health;
pub mod logon_code;
pub mod social;
pub mod types;

#[cfg(test)]
mod tests;
