pub(crate) mod refresh;
pub(crate) mod register;
pub(crate) mod show;
pub(crate) mod validate;
