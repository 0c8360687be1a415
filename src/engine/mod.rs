pub mod decision;
pub mod dispatcher;
pub mod session;
pub mod settle;
