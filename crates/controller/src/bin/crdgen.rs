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

//! Print every custom resource definition as one multi-document YAML stream
//!
//! `crdgen | kubectl apply -f -`

use analysis_controller::crds::all_crds;

fn main() -> anyhow::Result<()> {
    for crd in all_crds() {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
