pub(crate) mod mpesa_handlers;
pub(crate) mod payments;
