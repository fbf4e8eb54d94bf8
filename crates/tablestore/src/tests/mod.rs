mod batch_tests;
mod helpers;
mod ttl_tests;
