mod interp;
mod validate;
