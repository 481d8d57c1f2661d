mod admin_tests;
mod launcher_tests;
mod stub_tests;
mod timeout_tests;
mod tls_tests;
