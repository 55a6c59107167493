/*!
# Calculations Application

A small multi-user web application for storing arithmetic calculations, built in Rust.

## Overview

Registered users create, list, inspect, update and delete their own
calculations. Each calculation records an operation type, its inputs and the
computed result, along with creation and last-update timestamps. Records are
private: another user's calculation is indistinguishable from one that does
not exist.

## Architecture

The application follows a client-server architecture:

### Frontend Layer
- **Technologies**: HTML, CSS, JavaScript served by the backend
- **Key Components**:
  - Landing, login and registration pages
  - Dashboard - lists calculations and creates new ones
  - Detail view - shows one calculation with its visual (`2 + 3 = 5`) and a delete action
  - Edit page - changes the type and inputs of an existing calculation

### Backend Layer
- **Technologies**: Rust, axum, tokio
- **Core Components**:
  - Calculation model - operation types, validation and evaluation
  - Record store - id-keyed storage kept in creation order
  - Service API - ownership-checked create/read/update/delete
  - Accounts - registration, argon2 password hashing and bearer-token sessions
  - Error handler - maps domain failures onto HTTP status codes

### Client Layer
- **Technologies**: Rust, reqwest
- **Core Components**:
  - API client behind the [`api_client::CalculationApi`] trait
  - Process-wide session holding the bearer token
  - View controller - the detail page state machine, driven by `calc-cli`

### Data Persistence Layer
- Calculation snapshots with Gzip compression and bincode serialization
- User accounts in a JSON file next to the snapshot

## Operation Types

| Type           | Inputs      | Result                                   |
|----------------|-------------|------------------------------------------|
| addition       | 2 or more   | sum of all inputs                        |
| subtraction    | 2 or more   | first input minus each following input   |
| multiplication | 2 or more   | product of all inputs                    |
| division       | exactly 2   | first input divided by the second        |

Division by zero is rejected and nothing is stored.

## Modules

- **calculation**: Calculation record and operation types
- **error**: Domain error type shared by the store and service
- **saving**: Snapshot persistence with compression
- **store**: Calculation record store
- **service**: Ownership-checked operations on calculations
- **login**: User accounts and server-side sessions
- **config**: Server configuration (flags and environment)
- **app**: Routing and middleware
- **session**: Client-side session state
- **api_client**: HTTP client for the calculation endpoints
- **view**: Calculation detail view controller

## REST API Endpoints

- `POST /auth/register`, `POST /auth/login`, `POST /auth/logout` - Accounts and sessions
- `GET /calculations` - Lists the caller's calculations, oldest first
- `POST /calculations` - Creates a calculation
- `GET /calculations/{id}` - Retrieves one calculation
- `PUT /calculations/{id}` - Changes type and/or inputs and recomputes the result
- `DELETE /calculations/{id}` - Removes a calculation
*/

pub mod api_client;
pub mod calculation;
pub mod error;
pub mod login;
pub mod saving;
pub mod service;
pub mod session;
pub mod store;
pub mod view;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod config;

pub use calculation::{Calculation, CalculationType};
pub use error::{CalcError, Result};
pub use service::{CalculationCreate, CalculationService, CalculationUpdate};
pub use store::CalculationStore;
