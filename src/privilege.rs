pub mod casbin;
