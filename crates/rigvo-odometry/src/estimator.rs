use std::collections::VecDeque;

use glam::{DVec2, DVec3};
use rigvo_geometry::epipolar::{away_from_epipoles, epipoles};
use rigvo_geometry::essential::essential_from_pose;
use rigvo_geometry::pnp::{fit_pose, MIN_PNP_POINTS};
use rigvo_geometry::triangulation::{in_front_of_both, triangulate_point};
use rigvo_geometry::{EncodedPose, RigGeometry, RigPose, TrifocalTensor};

use crate::config::OdometryConfig;
use crate::error::OdometryError;
use crate::flow::CorrespondenceFilter;
use crate::fusion::TemporalFusion;
use crate::heading::{expected_heading, mean_bearing};
use crate::random::{RandomSource, SeededRandom};
use crate::refiner::{PoseRefiner, RefineRequest};

/// Indices of one physical feature in the keypoint lists of three consecutive frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripletMatch {
    /// Keypoint indices in the oldest frame.
    pub a: Vec<usize>,
    /// Keypoint indices in the middle frame.
    pub b: Vec<usize>,
    /// Keypoint indices in the newest frame.
    pub c: Vec<usize>,
}

impl TripletMatch {
    /// Number of matched features.
    pub fn len(&self) -> usize {
        self.a.len()
    }

    /// Whether nothing was matched.
    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }
}

/// Data submitted for one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameInput {
    /// Sensor sequence id, strictly increasing and possibly skipping values.
    pub seqid: u64,
    /// Pixel keypoints per camera, `None` for cameras without data.
    pub keypoints: Vec<Option<Vec<DVec2>>>,
    /// Per camera, matches linking the two previous frames to this one.
    pub matches: Vec<Option<TripletMatch>>,
}

/// Result of one processed triplet.
#[derive(Debug, Clone, PartialEq)]
pub struct TripletEstimate {
    /// Slot of the motion from the oldest to the middle frame.
    pub frame_ab: usize,
    /// Slot of the motion from the middle to the newest frame.
    pub frame_bc: usize,
    /// Current aggregate of `frame_ab`.
    pub ab: Option<EncodedPose>,
    /// Current aggregate of `frame_bc`.
    pub bc: Option<EncodedPose>,
    /// Ratio of elapsed sequence ids the triplet was gated against.
    pub expected_scale: f64,
    /// Cameras whose estimate passed the scale gate.
    pub accepted_cameras: Vec<usize>,
}

#[derive(Debug, Clone)]
struct StoredFrame {
    index: usize,
    seqid: u64,
    keypoints: Vec<Option<Vec<DVec2>>>,
}

/// Rig visual odometry over a stream of frames.
///
/// Frames are submitted in order; once three frames are available every submission estimates
/// the motion of each camera over the latest triplet, converts it into rig motion and feeds the
/// scale-gated result into the temporal fusion.
pub struct RigOdometry<R: RandomSource = SeededRandom> {
    config: OdometryConfig,
    rig: RigGeometry,
    filter: CorrespondenceFilter,
    refiner: PoseRefiner,
    fusion: TemporalFusion,
    rng: R,
    frames: VecDeque<StoredFrame>,
    next_index: usize,
    prev_scale: f64,
}

impl RigOdometry<SeededRandom> {
    /// Create an estimator; randomness is seeded from `config.random_seed`.
    pub fn new(config: OdometryConfig) -> Result<Self, OdometryError> {
        let rng = SeededRandom::new(config.random_seed);
        Self::with_random(config, rng)
    }
}

impl<R: RandomSource> RigOdometry<R> {
    /// Create an estimator with an explicit random source.
    pub fn with_random(config: OdometryConfig, rng: R) -> Result<Self, OdometryError> {
        config.validate()?;
        let rig = RigGeometry::new(config.calibration.clone())?;
        Ok(Self {
            filter: CorrespondenceFilter::new(&config.flow),
            refiner: PoseRefiner::new(rig.clone(), config.refiner.clone()),
            fusion: TemporalFusion::new(config.fusion.clone()),
            rig,
            config,
            rng,
            frames: VecDeque::with_capacity(3),
            next_index: 0,
            prev_scale: 1.0,
        })
    }

    /// The rig lookup table.
    pub fn rig(&self) -> &RigGeometry {
        &self.rig
    }

    /// The candidate accumulator.
    pub fn fusion(&self) -> &TemporalFusion {
        &self.fusion
    }

    /// Current aggregate rig motion into frame `frame`.
    pub fn aggregate(&self, frame: usize) -> Option<EncodedPose> {
        self.fusion.aggregate(frame)
    }

    /// Submit one frame. Returns an estimate once at least three frames were submitted.
    ///
    /// PRECONDITION: `keypoints` and `matches` have one entry per rig camera and sequence ids
    /// strictly increase.
    pub fn submit(&mut self, frame: FrameInput) -> Option<TripletEstimate> {
        let num_cameras = self.rig.num_cameras();
        assert_eq!(
            frame.keypoints.len(),
            num_cameras,
            "keypoints must have one entry per camera"
        );
        assert_eq!(
            frame.matches.len(),
            num_cameras,
            "matches must have one entry per camera"
        );
        if let Some(last) = self.frames.back() {
            assert!(
                frame.seqid > last.seqid,
                "sequence ids must increase: {} after {}",
                frame.seqid,
                last.seqid
            );
        }

        let index = self.next_index;
        self.next_index += 1;
        log::info!("frame {index}: seqid {}", frame.seqid);

        if self.frames.len() == 3 {
            self.frames.pop_front();
        }
        self.frames.push_back(StoredFrame {
            index,
            seqid: frame.seqid,
            keypoints: frame.keypoints,
        });
        if self.frames.len() < 3 {
            return None;
        }

        let (fa, fb, fc) = (&self.frames[0], &self.frames[1], &self.frames[2]);
        let frame_ab = fb.index;
        let expected_scale = (fc.seqid - fb.seqid) as f64 / (fb.seqid - fa.seqid) as f64;

        let mut accepted_cameras = Vec::new();
        for (camera, matches) in frame.matches.iter().enumerate() {
            let Some(matches) = matches else {
                log::debug!("frame {frame_ab}: camera {camera} has no matches");
                continue;
            };
            match self.estimate_camera(camera, frame_ab, matches) {
                Ok(Some((ab, bc))) => {
                    if self.fusion.offer(frame_ab, ab, bc, expected_scale) {
                        accepted_cameras.push(camera);
                    }
                }
                Ok(None) => {}
                Err(err) => log::warn!("frame {frame_ab}: camera {camera} skipped: {err}"),
            }
        }
        self.prev_scale = expected_scale;

        let estimate = TripletEstimate {
            frame_ab,
            frame_bc: frame_ab + 1,
            ab: self.fusion.aggregate(frame_ab),
            bc: self.fusion.aggregate(frame_ab + 1),
            expected_scale,
            accepted_cameras,
        };
        if let (Some(ab), Some(bc)) = (&estimate.ab, &estimate.bc) {
            log::debug!(
                "frame {frame_ab}: mean heading {:.1} deg",
                mean_bearing(ab.azimuth, bc.azimuth).to_degrees()
            );
        }
        Some(estimate)
    }

    /// Motion of one camera over the current triplet as rig poses `(A -> B, B -> C)`.
    fn estimate_camera(
        &mut self,
        camera: usize,
        frame_ab: usize,
        matches: &TripletMatch,
    ) -> Result<Option<(EncodedPose, EncodedPose)>, OdometryError> {
        assert!(
            matches.a.len() == matches.b.len() && matches.b.len() == matches.c.len(),
            "camera {camera}: match lists differ in length"
        );
        let keypoints: Vec<&[DVec2]> = self
            .frames
            .iter()
            .filter_map(|f| f.keypoints[camera].as_deref())
            .collect();
        let [ka, kb, kc] = keypoints[..] else {
            log::debug!("frame {frame_ab}: camera {camera} misses keypoints in the triplet");
            return Ok(None);
        };

        let pa: Vec<DVec2> = matches.a.iter().map(|&i| ka[i]).collect();
        let pb: Vec<DVec2> = matches.b.iter().map(|&i| kb[i]).collect();
        let pc: Vec<DVec2> = matches.c.iter().map(|&i| kc[i]).collect();

        let mask = self.filter.filter(&pa, &pb, &pc);
        let keep = |points: &[DVec2]| -> Vec<DVec3> {
            let kept: Vec<DVec2> = points
                .iter()
                .zip(mask.iter())
                .filter(|(_, k)| **k)
                .map(|(p, _)| *p)
                .collect();
            self.rig.normalize_points(camera, &kept)
        };
        let (xa, xb, xc) = (keep(&pa), keep(&pb), keep(&pc));
        log::debug!(
            "frame {frame_ab}: camera {camera} keeps {} of {} correspondences",
            xa.len(),
            pa.len()
        );
        if xa.len() < self.config.flow.min_points {
            return Ok(None);
        }

        let seeds = match TrifocalTensor::from_points(&xa, &xb, &xc).and_then(|t| t.extract_poses()) {
            Ok(poses) => vec![poses.ab],
            Err(err) => {
                log::warn!("frame {frame_ab}: camera {camera} trifocal solve failed: {err}");
                Vec::new()
            }
        };

        let priors = self.fusion.candidates(frame_ab).to_vec();
        let heading = self.config.forward_camera.and_then(expected_heading);
        let request = RefineRequest::new(camera, &xa, &xb)
            .with_priors(&priors)
            .with_seeds(seeds)
            .with_heading(heading);
        let refinement = self.refiner.refine(&mut self.rng, &request)?;
        log::debug!(
            "frame {frame_ab}: camera {camera} refined to fitness {:.5} in {} generations",
            refinement.fitness,
            refinement.generations
        );

        let p_ab = refinement.pose;
        let Some(p_ac) = self.fit_third_view(&p_ab, &xa, &xb, &xc)? else {
            log::debug!("frame {frame_ab}: camera {camera} has too few points for the third view");
            return Ok(None);
        };

        let h_ab = refinement.rig_pose;
        let h_ac = self.rig.to_rig_frame(camera, &p_ac);
        let h_bc = h_ac * h_ab.inverse();

        let ab = EncodedPose::encode(&h_ab);
        let ab = ab.with_scale(ab.scale * self.prev_scale);
        let bc = EncodedPose::encode(&h_bc);
        Ok(Some((ab, bc)))
    }

    /// Camera-local pose of the third view from points triangulated with the first two.
    fn fit_third_view(
        &self,
        p_ab: &RigPose,
        xa: &[DVec3],
        xb: &[DVec3],
        xc: &[DVec3],
    ) -> Result<Option<RigPose>, OdometryError> {
        let mask = away_from_epipoles(
            xa,
            xb,
            epipoles(&essential_from_pose(p_ab)),
            self.config.refiner.epipole_cutoff,
        );
        let (points, image): (Vec<DVec3>, Vec<DVec3>) = xa
            .iter()
            .zip(xb.iter())
            .zip(xc.iter())
            .zip(mask.iter())
            .filter(|(_, keep)| **keep)
            .filter_map(|(((a, b), c), _)| {
                triangulate_point(*a, *b, &RigPose::IDENTITY, p_ab)
                    .filter(|x| in_front_of_both(*x, p_ab))
                    .map(|x| (x, *c))
            })
            .unzip();
        if points.len() < MIN_PNP_POINTS {
            return Ok(None);
        }
        Ok(Some(fit_pose(&points, &image)?))
    }
}
