mod activation;
mod build;
mod check_env;
