mod common;
mod group_test;
mod manager_test;
mod postgres_test;
