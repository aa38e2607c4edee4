// Three security tiers, mirrored by the router in `server.rs`:
//
// public    no authentication            /, /health, /auth/*
// protected bearer token                 /api/auth/*, /api/notes/*, /api/users/*
// elevated  bearer token + admin role    /api/admin/*

pub mod elevated;
pub mod protected;
pub mod public;
