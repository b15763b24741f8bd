//! 8-D constant-velocity Kalman filter over `[cx,cy,w,h,vx,vy,vw,vh]`,
//! measuring `[cx,cy,w,h]`.

use nalgebra::{Matrix4, Matrix4x8, Matrix8, Matrix8x4, SMatrix, SVector};

const EPS: f32 = 1e-3;

pub type State8 = SVector<f32, 8>;
pub type Cov8 = SMatrix<f32, 8, 8>;

#[derive(Debug, Clone)]
pub struct KalmanBBoxFilter {
    pub x: State8,
    pub p: Cov8,
    f: Matrix8<f32>,
    h: Matrix4x8<f32>,
    q: Matrix8<f32>,
    r: Matrix4<f32>,
}

impl KalmanBBoxFilter {
    /// `q` and `r` are the process- and measurement-noise scale
    /// constants; velocities get a `q` scaled by 2x to reflect their
    /// larger uncertainty.
    pub fn new(cx: f32, cy: f32, w: f32, h: f32, q: f32, r: f32) -> Self {
        let mut f = Matrix8::identity();
        for i in 0..4 {
            f[(i, i + 4)] = 1.0;
        }

        let mut hmat = Matrix4x8::zeros();
        for i in 0..4 {
            hmat[(i, i)] = 1.0;
        }

        let mut qmat = Matrix8::identity() * q;
        for i in 4..8 {
            qmat[(i, i)] = q * 2.0;
        }

        let rmat = Matrix4::identity() * r;

        let x = State8::new(cx, cy, w, h, 0.0, 0.0, 0.0, 0.0);
        let p = Cov8::identity();

        Self {
            x,
            p,
            f,
            h: hmat,
            q: qmat,
            r: rmat,
        }
    }

    pub fn predict(&mut self) {
        self.x = self.f * self.x;
        self.p = self.f * self.p * self.f.transpose() + self.q;
    }

    /// Updates with measurement `z = [cx, cy, w, h]`. Falls back to the
    /// Moore-Penrose pseudo-inverse if the innovation covariance is
    /// singular.
    pub fn update(&mut self, z: [f32; 4]) {
        let z = SVector::<f32, 4>::from_row_slice(&z);
        let y = z - self.h * self.x;
        let s: Matrix4<f32> = self.h * self.p * self.h.transpose() + self.r;

        let s_inv = match s.try_inverse() {
            Some(inv) => inv,
            None => s.pseudo_inverse(1e-6).unwrap_or_else(|_| Matrix4::zeros()),
        };

        let k: Matrix8x4<f32> = self.p * self.h.transpose() * s_inv;
        self.x += k * y;
        let identity = Cov8::identity();
        self.p = (identity - k * self.h) * self.p;

        self.clamp_state();
    }

    fn clamp_state(&mut self) {
        for i in 0..2 {
            self.x[i] = self.x[i].clamp(0.0, 1.0);
        }
        self.x[2] = self.x[2].max(EPS);
        self.x[3] = self.x[3].max(EPS);
    }

    /// Current smoothed bbox in `xyxy`, clamped to `[0, 1]`.
    pub fn bbox_xyxy(&self) -> [f32; 4] {
        let (cx, cy, w, h) = (self.x[0], self.x[1], self.x[2], self.x[3]);
        let x1 = (cx - w / 2.0).clamp(0.0, 1.0);
        let y1 = (cy - h / 2.0).clamp(0.0, 1.0);
        let x2 = (cx + w / 2.0).clamp(0.0, 1.0);
        let y2 = (cy + h / 2.0).clamp(0.0, 1.0);
        [x1, y1, x2, y2]
    }

    pub fn velocity(&self) -> [f32; 4] {
        [self.x[4], self.x[5], self.x[6], self.x[7]]
    }
}
