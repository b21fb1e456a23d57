mod common;

mod connections_test;
mod health_test;
