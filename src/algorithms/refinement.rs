//! Nonlinear refinement of a relative pose over the Sampson error of its inliers.
//!
//! The pose is parametrized by a rotation increment `w` (applied on the left,
//! `R' = exp(w) R`) and a step in the tangent plane of the unit translation, five
//! degrees of freedom in total. Levenberg-Marquardt solves
//!
//! ```text
//! (J^T J + λ diag(J^T J)) δ = -J^T r
//! ```
//!
//! where `λ` shrinks after a step that lowers the cost and grows otherwise.

use nalgebra::{Rotation3, SMatrix, Vector3};

use super::{
    camera::RelativePose,
    essential::{EssentialMatrix, PointPair},
};

type Matrix5 = SMatrix<f64, 5, 5>;
type Vector5 = SMatrix<f64, 5, 1>;

const MAX_ITERATIONS: usize = 10;
const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-9;
const MAX_DAMPING: f64 = 1e6;
/// Central difference step for the Jacobian.
const DIFFERENCE_STEP: f64 = 1e-7;

/// Minimizes the summed squared Sampson error of `pairs` under `pose`.
///
/// Never returns a pose with a higher cost than the one it started from.
pub fn refine_pose(pose: RelativePose, pairs: &[PointPair]) -> RelativePose {
    let mut pose = pose;
    let mut cost = sampson_cost(&pose, pairs);
    let mut damping = INITIAL_DAMPING;

    for _ in 0..MAX_ITERATIONS {
        let (hessian, gradient) = normal_equations(&pose, pairs);
        loop {
            let mut damped = hessian;
            for i in 0..5 {
                damped[(i, i)] += damping * hessian[(i, i)];
            }

            let step = damped.cholesky().map(|cholesky| cholesky.solve(&(-gradient)));
            if let Some(step) = step {
                let candidate = perturb(&pose, &step);
                let candidate_cost = sampson_cost(&candidate, pairs);
                if candidate_cost < cost {
                    pose = candidate;
                    cost = candidate_cost;
                    damping = (damping / 10.0).max(MIN_DAMPING);
                    break;
                }
            }

            damping *= 10.0;
            if damping > MAX_DAMPING {
                return pose;
            }
        }
    }
    pose
}

fn sampson_cost(pose: &RelativePose, pairs: &[PointPair]) -> f64 {
    let essential = EssentialMatrix::from_pose(pose);
    pairs
        .iter()
        .filter_map(|pair| essential.sampson_error(pair))
        .map(|error| error * error)
        .sum()
}

/// `J^T J` and `J^T r` with a numerical Jacobian.
fn normal_equations(pose: &RelativePose, pairs: &[PointPair]) -> (Matrix5, Vector5) {
    let essential = EssentialMatrix::from_pose(pose);
    let perturbed: [(EssentialMatrix, EssentialMatrix); 5] = std::array::from_fn(|k| {
        let mut delta = Vector5::zeros();
        delta[k] = DIFFERENCE_STEP;
        (
            EssentialMatrix::from_pose(&perturb(pose, &delta)),
            EssentialMatrix::from_pose(&perturb(pose, &-delta)),
        )
    });

    let mut hessian = Matrix5::zeros();
    let mut gradient = Vector5::zeros();
    for pair in pairs {
        let Some(residual) = essential.sampson_error(pair) else {
            continue;
        };

        let mut jacobian = Vector5::zeros();
        let mut finite = true;
        for (k, (plus, minus)) in perturbed.iter().enumerate() {
            match (plus.sampson_error(pair), minus.sampson_error(pair)) {
                (Some(a), Some(b)) => jacobian[k] = (a - b) / (2.0 * DIFFERENCE_STEP),
                _ => {
                    finite = false;
                    break;
                }
            }
        }
        if finite {
            hessian += jacobian * jacobian.transpose();
            gradient += jacobian * residual;
        }
    }
    (hessian, gradient)
}

fn perturb(pose: &RelativePose, delta: &Vector5) -> RelativePose {
    let increment = Rotation3::new(Vector3::new(delta[0], delta[1], delta[2]));
    let (b1, b2) = tangent_basis(&pose.translation);
    let translation = pose.translation + b1 * delta[3] + b2 * delta[4];

    RelativePose {
        rotation: increment.matrix() * pose.rotation,
        translation: translation.normalize(),
    }
}

/// Orthonormal pair spanning the plane orthogonal to the unit vector `t`.
fn tangent_basis(t: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let axis = if t.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let b1 = t.cross(&axis).normalize();
    let b2 = t.cross(&b1);
    (b1, b2)
}
