//! Genetic refinement of a camera-local relative pose against the bidirectional epipolar
//! distance.
//!
//! Individuals carry the six pose genes plus a self-adaptive mutation step. The population is
//! seeded from prior rig poses, caller supplied guesses and essential matrices of random
//! correspondence subsets that pass the rig motion limits. Each generation every slot except the
//! best one gets a child of two breeders, and keeps it only if it scores better.

use glam::DVec3;
use rigvo_geometry::epipolar::epipolar_fitness;
use rigvo_geometry::essential::{essential_8point, poses_from_essential};
use rigvo_geometry::triangulation::goodness;
use rigvo_geometry::{EncodedPose, GeometryError, RigGeometry, RigPose};

use crate::config::RefinerParams;
use crate::error::OdometryError;
use crate::heading::heading_within;
use crate::random::RandomSource;

/// A member of the population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Individual {
    /// Camera-local pose genes with their mutation step.
    pub genes: EncodedPose,
    /// Bidirectional epipolar distance, lower is better.
    pub fitness: f64,
}

/// Everything the refiner needs to know about one camera pair.
#[derive(Debug, Clone)]
pub struct RefineRequest<'a> {
    /// Camera the correspondences belong to.
    pub camera: usize,
    /// Normalized points in the first view.
    pub x1: &'a [DVec3],
    /// Normalized points in the second view.
    pub x2: &'a [DVec3],
    /// Previously accepted rig poses for this frame pair.
    pub priors: &'a [EncodedPose],
    /// Additional camera-local starting guesses.
    pub seeds: Vec<RigPose>,
    /// Expected rig heading, when the forward camera is known.
    pub heading: Option<f64>,
}

impl<'a> RefineRequest<'a> {
    /// Request for a camera pair without priors, seeds or heading.
    pub fn new(camera: usize, x1: &'a [DVec3], x2: &'a [DVec3]) -> Self {
        Self {
            camera,
            x1,
            x2,
            priors: &[],
            seeds: Vec::new(),
            heading: None,
        }
    }

    /// Use previously accepted rig poses as part of the initial population.
    pub fn with_priors(mut self, priors: &'a [EncodedPose]) -> Self {
        self.priors = priors;
        self
    }

    /// Add camera-local starting guesses.
    pub fn with_seeds(mut self, seeds: Vec<RigPose>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Constrain the heading of the seeded rig poses.
    pub fn with_heading(mut self, heading: Option<f64>) -> Self {
        self.heading = heading;
        self
    }
}

/// Outcome of a refinement.
#[derive(Debug, Clone, Copy)]
pub struct Refinement {
    /// Best camera-local pose, translation of unit length.
    pub pose: RigPose,
    /// The same motion expressed in the rig frame.
    pub rig_pose: RigPose,
    /// Fitness of the best individual.
    pub fitness: f64,
    /// Generations run in the final attempt.
    pub generations: usize,
    /// Number of restarts without heading bias.
    pub heading_retries: usize,
    /// Whether the rig heading matches the expected one (always true without a heading).
    pub heading_ok: bool,
}

enum RefineState {
    Seeding { heading_bias: bool, attempt: usize },
    Converged { best: Individual, generations: usize, attempt: usize },
    Accepted(Refinement),
    Exhausted(Refinement),
}

/// Genetic optimizer for camera-local relative poses.
#[derive(Debug, Clone)]
pub struct PoseRefiner {
    rig: RigGeometry,
    params: RefinerParams,
}

impl PoseRefiner {
    /// Create a refiner for a rig.
    pub fn new(rig: RigGeometry, params: RefinerParams) -> Self {
        Self { rig, params }
    }

    /// Refiner parameters.
    pub fn params(&self) -> &RefinerParams {
        &self.params
    }

    /// Refine the relative pose of one camera between two frames.
    ///
    /// When a heading is requested and the converged pose points elsewhere, the optimization is
    /// restarted without heading bias and without priors, up to `max_heading_retries` times. The
    /// last result is returned either way, flagged through [`Refinement::heading_ok`].
    ///
    /// A biased seeding that finds no admissible seed restarts the same way and draws on the same
    /// `max_heading_retries` budget. With the default single retry, the unbiased attempt that
    /// follows is returned even if it converges off the expected heading.
    pub fn refine<R: RandomSource>(
        &self,
        rng: &mut R,
        request: &RefineRequest<'_>,
    ) -> Result<Refinement, OdometryError> {
        if request.x1.len() != request.x2.len() {
            return Err(GeometryError::MismatchedArrayLengths {
                left_name: "x1",
                left_len: request.x1.len(),
                right_name: "x2",
                right_len: request.x2.len(),
            }
            .into());
        }

        let mut state = RefineState::Seeding {
            heading_bias: request.heading.is_some(),
            attempt: 0,
        };
        loop {
            state = match state {
                RefineState::Seeding {
                    heading_bias,
                    attempt,
                } => {
                    match self.seed(rng, request, heading_bias, attempt == 0) {
                        Ok(mut population) => {
                            let generations = self.evolve(rng, request, &mut population);
                            RefineState::Converged {
                                best: population[0],
                                generations,
                                attempt,
                            }
                        }
                        Err(OdometryError::InsufficientSeeds { attempts })
                            if heading_bias && attempt < self.params.max_heading_retries =>
                        {
                            log::info!(
                                "camera {}: no seed within the heading arc after {attempts} draws, retrying without bias",
                                request.camera
                            );
                            RefineState::Seeding {
                                heading_bias: false,
                                attempt: attempt + 1,
                            }
                        }
                        Err(err) => return Err(err),
                    }
                }
                RefineState::Converged {
                    best,
                    generations,
                    attempt,
                } => {
                    let result = self.finish(request, best, generations, attempt);
                    if result.heading_ok {
                        RefineState::Accepted(result)
                    } else if attempt < self.params.max_heading_retries {
                        log::info!(
                            "camera {}: heading {:.1} deg outside the expected arc, retrying without bias",
                            request.camera,
                            EncodedPose::encode(&result.rig_pose).azimuth.to_degrees()
                        );
                        RefineState::Seeding {
                            heading_bias: false,
                            attempt: attempt + 1,
                        }
                    } else {
                        RefineState::Exhausted(result)
                    }
                }
                RefineState::Accepted(result) => return Ok(result),
                RefineState::Exhausted(result) => {
                    log::debug!(
                        "camera {}: keeping heading-inconsistent result after {} retries",
                        request.camera,
                        result.heading_retries
                    );
                    return Ok(result);
                }
            };
        }
    }

    fn fitness(&self, request: &RefineRequest<'_>, genes: &EncodedPose) -> f64 {
        let f = epipolar_fitness(
            &genes.decode(),
            request.x1,
            request.x2,
            self.params.epipole_cutoff,
        );
        if f.is_finite() {
            f
        } else {
            f64::INFINITY
        }
    }

    fn individual(&self, request: &RefineRequest<'_>, pose: &RigPose) -> Individual {
        let genes = EncodedPose::encode_with_sigma(pose, self.params.initial_sigma).with_scale(1.0);
        Individual {
            fitness: self.fitness(request, &genes),
            genes,
        }
    }

    /// Whether a camera-local pose moves the rig within the admissible limits.
    pub fn admissible(&self, camera: usize, pose: &RigPose, heading: Option<f64>) -> bool {
        let rig_pose = self.rig.to_rig_frame(camera, pose);
        let encoded = EncodedPose::encode(&rig_pose);
        let r = encoded.rotation;
        let limit = self.params.max_rotation;
        if r.x.abs() >= limit || r.y.abs() >= limit || r.z.abs() >= limit {
            return false;
        }
        match heading {
            Some(expected) => heading_within(encoded.azimuth, expected, self.params.heading_half_arc),
            None => true,
        }
    }

    fn seed<R: RandomSource>(
        &self,
        rng: &mut R,
        request: &RefineRequest<'_>,
        heading_bias: bool,
        use_priors: bool,
    ) -> Result<Vec<Individual>, OdometryError> {
        let size = self.params.population_size;
        let heading = request.heading.filter(|_| heading_bias);
        let mut population = Vec::with_capacity(size);

        if use_priors {
            for prior in request.priors.iter().take(size) {
                let rig_pose = prior.with_scale(1.0).decode();
                let local = self.rig.to_camera_frame(request.camera, &rig_pose);
                population.push(self.individual(request, &local));
            }
            for seed in &request.seeds {
                if population.len() < size && self.admissible(request.camera, seed, heading) {
                    population.push(self.individual(request, seed));
                }
            }
        }

        let n = request.x1.len();
        // leave room for distinct subsets when few correspondences survive
        let k = self.params.seed_sample_size.min(n * 3 / 4).max(8).min(n);
        let mut attempts = 0;
        if n >= 8 {
            while population.len() < size && attempts < self.params.max_seed_attempts {
                attempts += 1;
                let idx = rng.sample(n, k);
                let x1: Vec<DVec3> = idx.iter().map(|&i| request.x1[i]).collect();
                let x2: Vec<DVec3> = idx.iter().map(|&i| request.x2[i]).collect();
                let candidates = match essential_8point(&x1, &x2).and_then(|e| poses_from_essential(&e)) {
                    Ok(candidates) => candidates,
                    Err(err) => {
                        log::trace!("seed sample rejected: {err}");
                        continue;
                    }
                };
                for pose in candidates {
                    if population.len() < size && self.admissible(request.camera, &pose, heading) {
                        population.push(self.individual(request, &pose));
                    }
                }
            }
        }

        if population.is_empty() {
            return Err(OdometryError::InsufficientSeeds { attempts });
        }
        log::debug!(
            "camera {}: seeded {} individuals after {attempts} draws (heading bias: {})",
            request.camera,
            population.len(),
            heading.is_some()
        );
        Ok(population)
    }

    fn sort(population: &mut [Individual]) {
        population.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));
    }

    fn breed<R: RandomSource>(&self, rng: &mut R, p1: &Individual, p2: &Individual) -> EncodedPose {
        let a = p1.genes.genes();
        let b = p2.genes.genes();
        let cut = 1 + rng.uniform_index(5);
        let mut genes = [0.0; 6];
        genes[..cut].copy_from_slice(&a[..cut]);
        genes[cut..].copy_from_slice(&b[cut..]);

        let sigma = p1.genes.sigma.unwrap_or(self.params.initial_sigma);
        // the magnitude gene does not change the epipolar distance
        let count = self.params.mutated_genes.min(5);
        for g in rng.sample(5, count) {
            genes[g] = rng.gaussian(genes[g], sigma);
        }
        let sigma = sigma * rng.gaussian(0.0, self.params.sigma_step).exp();
        EncodedPose::from_genes(genes).with_sigma(sigma).canonical()
    }

    /// Evolve the population in place; returns the number of generations run. The population
    /// ends sorted by fitness.
    fn evolve<R: RandomSource>(
        &self,
        rng: &mut R,
        request: &RefineRequest<'_>,
        population: &mut [Individual],
    ) -> usize {
        let len = population.len();
        let breeders = ((self.params.breeder_fraction * len as f64).ceil() as usize)
            .max(2)
            .min(len);
        let mut generation = 0;
        Self::sort(population);
        while generation < self.params.iterations {
            if population[0].fitness < self.params.fitness_stop {
                log::debug!(
                    "camera {}: fitness {:.5} below stop threshold after {generation} generations",
                    request.camera,
                    population[0].fitness
                );
                return generation;
            }
            if let Some(sigma) = population[0].genes.sigma.as_mut() {
                *sigma *= self.params.best_sigma_decay;
            }

            let parents: Vec<Individual> = population[..breeders].to_vec();
            for slot in population.iter_mut().skip(1) {
                let p1 = &parents[rng.uniform_index(breeders)];
                let p2 = &parents[rng.uniform_index(breeders)];
                let genes = self.breed(rng, p1, p2);
                let fitness = self.fitness(request, &genes);
                if fitness < slot.fitness {
                    *slot = Individual { genes, fitness };
                }
            }
            Self::sort(population);
            generation += 1;
        }
        log::debug!(
            "camera {}: iteration budget spent, best fitness {:.5}",
            request.camera,
            population[0].fitness
        );
        generation
    }

    fn finish(
        &self,
        request: &RefineRequest<'_>,
        best: Individual,
        generations: usize,
        attempt: usize,
    ) -> Refinement {
        let decoded = best.genes.decode();
        let flipped = decoded.with_flipped_translation();
        let (kept, other) = (
            goodness(request.x1, request.x2, &decoded),
            goodness(request.x1, request.x2, &flipped),
        );
        log::trace!(
            "camera {}: translation twin goodness {kept:.2} / {other:.2}",
            request.camera
        );
        let pose = if other > kept { flipped } else { decoded };
        let rig_pose = self.rig.to_rig_frame(request.camera, &pose);
        let heading_ok = request.heading.map_or(true, |expected| {
            heading_within(
                EncodedPose::encode(&rig_pose).azimuth,
                expected,
                self.params.heading_half_arc,
            )
        });
        Refinement {
            pose,
            rig_pose,
            fitness: best.fitness,
            generations,
            heading_retries: attempt,
            heading_ok,
        }
    }
}
