mod decoder;
mod document;
mod seed;
