pub mod customers;
pub mod dashboard;
pub mod email;
pub mod events;
pub mod invoices;
pub mod payments;
pub mod pdf;
pub mod products;
pub mod reminders;
pub mod stripe;
pub mod tenants;

pub use customers::CustomerService;
pub use email::{EmailService, Mailer};
pub use events::EventDispatcher;
pub use invoices::InvoiceService;
pub use payments::PaymentService;
pub use products::ProductService;
pub use stripe::StripeClient;
pub use tenants::TenantService;
