/*
 * AI Analysis Controller - Kubernetes Operator for AI-Assisted Security Review
 * Copyright (C) 2025 AI Analysis Operator authors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Analysis controller library
//!
//! This crate provides the custom resources, the reconciliation engine and the
//! pluggable analyzer backends behind the `analysis-controller` binary.

pub mod analyzers;
pub mod crds;
pub mod engine;
pub mod registry;
pub mod reporting;
pub mod tasks;
pub mod telemetry;

pub use crds::{
    AIManifestAnalysis, AINetworkPolicyAudit, AIPodSecurityAssessment, AISecretsAudit,
    AISecurityAnomaly,
};
pub use engine::{Engine, EngineSettings, Outcome};
pub use registry::{AnalyzerRegistry, RequestKind};
pub use tasks::config::ControllerConfig;
pub use tasks::types::{Error, Result};
