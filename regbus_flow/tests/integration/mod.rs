mod common;
mod pick_and_place;
mod retry;
mod service;
