// src/utils/mod.rs

pub mod exam_helpers;
pub mod hash;
pub mod html;
pub mod jwt;
