pub mod admin;
pub mod auth;
pub mod checklists;
pub mod health;
pub mod issues;
pub mod objects;
pub mod transitions;
pub mod visits;
