mod billing;
mod stripe;
